//! Dial-based health probe.
//!
//! A backend is healthy if a TCP connection to its `host:port` can be opened
//! within the timeout. The probe connection is closed straight away.

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use crate::error::BalancerError;
use crate::load_balancer::Target;

/// Dial the target once.
pub async fn dial(target: &Target, timeout: Duration) -> Result<(), BalancerError> {
    let unreachable = |source| BalancerError::BackendUnreachable {
        address: target.authority().to_string(),
        source,
    };

    match time::timeout(timeout, TcpStream::connect(target.authority())).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Ok(())
        }
        Ok(Err(e)) => Err(unreachable(e)),
        Err(_) => Err(unreachable(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no connection after {:?}", timeout),
        ))),
    }
}
