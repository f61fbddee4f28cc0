//! Host addresses advertised to clients.

use std::net::Ipv4Addr;

use tracing::debug;

/// IPv4 addresses of the host's non-loopback interfaces, in interface
/// order and without duplicates.
///
/// Empty when the interface list cannot be read.
#[cfg(unix)]
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success getifaddrs stores a list head we free below
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        debug!(error = %std::io::Error::last_os_error(), "getifaddrs failed");
        return Vec::new();
    }

    let mut addresses = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: cursor is a node of the list getifaddrs returned
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_flags & libc::IFF_LOOPBACK as libc::c_uint != 0 {
            continue;
        }
        // SAFETY: ifa_addr is non-null and points into the same list
        let family = unsafe { (*entry.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }
        // SAFETY: AF_INET entries carry a sockaddr_in
        let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
        if !ip.is_loopback() && !addresses.contains(&ip) {
            addresses.push(ip);
        }
    }

    // SAFETY: head came from the successful getifaddrs call above
    unsafe { libc::freeifaddrs(head) };
    addresses
}

#[cfg(not(unix))]
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_exclude_loopback() {
        let addresses = local_ipv4_addresses();
        assert!(addresses.iter().all(|ip| !ip.is_loopback()));
    }

    #[test]
    fn test_addresses_are_unique() {
        let addresses = local_ipv4_addresses();
        let mut sorted = addresses.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), addresses.len());
    }
}
