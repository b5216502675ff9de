use std::net::IpAddr;

use ethlink_transport::ShapingError;

/// 查找拥有 `address` 的网卡名称。
///
/// # Why
/// - 内核整形规则挂在网卡上，而流只知道自己套接字的本地地址；本函数完成地址到网卡的映射。
///
/// # How
/// - 遍历 `getifaddrs` 的结果，比较每个 IPv4/IPv6 地址，命中即返回网卡名。
///
/// # 契约
/// - **前置条件**：`address` 必须是具体地址；未指定地址（`0.0.0.0`）不会命中任何网卡；
/// - **错误**：枚举失败返回 [`ShapingError::Io`]，未命中返回 [`ShapingError::InterfaceNotFound`]。
#[cfg(unix)]
pub fn interface_for_address(address: IpAddr) -> Result<String, ShapingError> {
    use std::{
        io,
        net::{SocketAddrV4, SocketAddrV6},
    };

    use nix::ifaddrs::getifaddrs;

    let interfaces = getifaddrs().map_err(|errno| ShapingError::Io(io::Error::from(errno)))?;
    for entry in interfaces {
        let Some(storage) = entry.address else {
            continue;
        };
        let candidate = if let Some(v4) = storage.as_sockaddr_in() {
            IpAddr::V4(*SocketAddrV4::from(*v4).ip())
        } else if let Some(v6) = storage.as_sockaddr_in6() {
            IpAddr::V6(*SocketAddrV6::from(*v6).ip())
        } else {
            continue;
        };
        if candidate == address {
            return Ok(entry.interface_name);
        }
    }
    Err(ShapingError::InterfaceNotFound {
        address: address.to_string(),
    })
}

/// 非 Unix 平台没有 `getifaddrs`，整形本身也不可用。
#[cfg(not(unix))]
pub fn interface_for_address(address: IpAddr) -> Result<String, ShapingError> {
    Err(ShapingError::NotSupported {
        reason: format!("cannot resolve interface for {address} on this platform"),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn loopback_address_resolves_to_an_interface() {
        let name = interface_for_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .expect("loopback interface");
        assert!(!name.is_empty());
    }

    #[test]
    fn unspecified_address_is_not_found() {
        let err = interface_for_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .expect_err("no interface owns 0.0.0.0");
        assert!(matches!(err, ShapingError::InterfaceNotFound { .. }));
    }
}
