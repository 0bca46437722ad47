use std::net::SocketAddr;
use std::path::Path;

use super::capture::CaptureFormat;

/// Printed once per run, when both connections of the pair exist.
#[derive(Debug)]
pub struct AccessLog<'a> {
    pub downstream: SocketAddr,
    pub upstream: SocketAddr,
    pub capture: Option<(&'a Path, CaptureFormat)>,
}
