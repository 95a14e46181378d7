//! Remote address resolution
//!
//! | Address             | Transport                                 |
//! |---------------------|-------------------------------------------|
//! | `file:///abs/path`  | [`LocalConnector`] rooted at `/abs/path`  |
//! | `local`             | [`LocalConnector`] rooted at `/`          |
//! | `memory://name`     | [`MemoryConnector`] with an empty remote  |
//! | `sftp://host:port`  | [`SftpConnector`] using `user`/`password` |
//! | `host[:port]`       | [`SftpConnector`], port 22 by default     |
//!
//! Any other scheme is rejected as an unsupported protocol.

use crate::{LocalConnector, MemoryConnector, SftpConnector};
use autoup_config::RemoteConfig;
use autoup_types::{Connector, Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Build the connector for a configured remote
pub fn connector_for(remote: &RemoteConfig) -> Result<Arc<dyn Connector>> {
    let address = remote.address.trim();

    if address.eq_ignore_ascii_case("local") {
        return Ok(Arc::new(LocalConnector::new(PathBuf::from("/"))));
    }

    match address.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("file") => {
            let root = PathBuf::from(rest);
            if !root.is_absolute() {
                return Err(Error::config(format!(
                    "File address '{}' must name an absolute path",
                    address
                )));
            }
            Ok(Arc::new(LocalConnector::new(root)))
        }
        Some((scheme, name)) if scheme.eq_ignore_ascii_case("memory") => {
            Ok(Arc::new(MemoryConnector::new(name)))
        }
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("sftp") => {
            Ok(Arc::new(SftpConnector::from_config(remote)?))
        }
        Some((scheme, _)) => Err(unsupported(scheme, address)),
        None => Ok(Arc::new(SftpConnector::from_config(remote)?)),
    }
}

fn unsupported(scheme: &str, address: &str) -> Error {
    Error::config(format!(
        "Unsupported remote protocol '{}' in address '{}'",
        scheme, address
    ))
}
