pub mod audio;
pub mod wav;

#[cfg(feature = "cpal")]
pub mod capture;
#[cfg(feature = "cpal")]
pub mod device;
