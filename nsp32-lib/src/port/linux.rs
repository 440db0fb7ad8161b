use glob::glob;
use std::fs;

/// True if any process holds `port_name` open.
pub fn is_port_open(port_name: &str) -> bool {
    let fds = match glob("/proc/[0-9]*/fd/*") {
        Ok(paths) => paths,
        Err(_) => return false,
    };

    fds.filter_map(|p| p.ok())
        .filter_map(|path| fs::read_link(path).ok())
        .any(|link| link.to_str() == Some(port_name))
}
