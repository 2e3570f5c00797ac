use tokio::net::TcpListener;
use tracing::debug;

use super::error::ConfigError;

/// Find the first bindable TCP port at or above `preferred` on `host`.
///
/// Each candidate is probed by binding a listener which is dropped before
/// returning, so the port is free again for the real server. Running past
/// 65535 is a configuration error.
pub async fn allocate_port(host: &str, preferred: u16) -> Result<u16, ConfigError> {
    let mut port = u32::from(preferred);
    while port <= u32::from(u16::MAX) {
        let candidate = port as u16;
        match TcpListener::bind((host, candidate)).await {
            Ok(probe) => {
                drop(probe);
                if candidate != preferred {
                    debug!(preferred, port = candidate, "preferred port busy, using next free port");
                }
                return Ok(candidate);
            }
            Err(e) => {
                debug!(port = candidate, error = %e, "port unavailable");
                port += 1;
            }
        }
    }

    Err(ConfigError::PortExhausted {
        start: u32::from(preferred),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_free_port_is_returned_as_is() {
        // Ask the OS for a free port, release it, then allocate it.
        let probe = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let allocated = allocate_port("127.0.0.1", port).await.unwrap();
        assert_eq!(allocated, port);
    }

    #[tokio::test]
    async fn test_busy_port_skips_to_next() {
        let held = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();

        let allocated = allocate_port("127.0.0.1", busy).await.unwrap();
        assert!(allocated > busy);

        // Everything skipped between the busy port and the result was taken.
        for skipped in busy + 1..allocated {
            assert!(
                TcpListener::bind(("127.0.0.1", skipped)).await.is_err(),
                "port {skipped} was free but skipped"
            );
        }

        // The returned port must actually be bindable.
        let rebound = TcpListener::bind(("127.0.0.1", allocated)).await;
        assert!(rebound.is_ok());
        drop(held);
    }
}
