pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod media;
pub mod remote;
pub mod retry;
pub mod tasks {
    pub mod control;
    pub mod sequencer;
    pub mod surface;
}
