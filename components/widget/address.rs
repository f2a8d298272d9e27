/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Backend addresses a widget class can point at.

use std::path::PathBuf;

/// A HTTP (or AJP) server plus a base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAddress {
    pub ssl: bool,
    pub host_and_port: String,
    /// Always starts with '/'.
    pub path: String,
}

impl HttpAddress {
    pub fn new(ssl: bool, host_and_port: &str, path: &str) -> HttpAddress {
        debug_assert!(path.starts_with('/'));

        HttpAddress {
            ssl,
            host_and_port: host_and_port.to_string(),
            path: path.to_string(),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    /// The absolute URI of this address (without query string).
    pub fn absolute_uri(&self) -> String {
        format!("{}://{}{}", self.scheme(), self.host_and_port, self.path)
    }
}

/// Address of a WAS application (a socket path the spawner
/// collaborator resolves).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasAddress {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    Http(HttpAddress),
    Ajp(HttpAddress),
    Was(WasAddress),
    LocalFile(PathBuf),
}

impl ResourceAddress {
    /// Only HTTP addresses can be contacted by the browser directly
    /// (URI rewrite mode "direct").
    pub fn is_http(&self) -> bool {
        matches!(self, ResourceAddress::Http(_))
    }

    /// The server-side base path, for address arithmetic.
    pub fn base_path(&self) -> Option<&str> {
        match self {
            ResourceAddress::Http(a) | ResourceAddress::Ajp(a) => Some(&a.path),
            ResourceAddress::Was(a) => Some(&a.path),
            ResourceAddress::LocalFile(_) => None,
        }
    }
}
