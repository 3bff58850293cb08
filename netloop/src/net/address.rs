use crate::error::{Error, Result};

use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// Validates an IPv4 address string and a port and builds the endpoint.
///
/// No socket is created here, so a rejected address never costs a
/// descriptor.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when `ip` is not a dotted-quad IPv4
/// address.
///
/// # Examples
///
/// ```rust
/// use netloop::net::resolve_and_validate;
///
/// let addr = resolve_and_validate("127.0.0.1", 8888).unwrap();
/// assert_eq!(addr.to_string(), "127.0.0.1:8888");
///
/// assert!(resolve_and_validate("999.999.999.999", 8888).is_err());
/// ```
pub fn resolve_and_validate(ip: &str, port: u16) -> Result<SocketAddrV4> {
    let ip_addr = Ipv4Addr::from_str(ip).map_err(|_| Error::Configuration {
        ip: ip.to_owned(),
        port,
    })?;

    Ok(SocketAddrV4::new(ip_addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = resolve_and_validate("10.0.0.7", 5000).unwrap();

        assert_eq!(*addr.ip(), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(addr.port(), 5000);
    }

    #[test]
    fn test_out_of_range_octets_rejected() {
        let err = resolve_and_validate("999.999.999.999", 8888).unwrap_err();

        assert!(err.is_configuration());
    }

    #[test]
    fn test_hostnames_and_ipv6_rejected() {
        assert!(resolve_and_validate("localhost", 80).is_err());
        assert!(resolve_and_validate("::1", 80).is_err());
        assert!(resolve_and_validate("", 80).is_err());
    }
}
