use anyhow::{Context, Result, anyhow, bail};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Address family a single check attempt is forced onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// Whatever the resolver or OS utility picks
    Any,
    V4,
    V6,
}

impl AddressFamily {
    /// Family for the single retry after a failed attempt on `Any`.
    ///
    /// IPv6 literals already went out over IPv6, so they retry on IPv4.
    pub fn fallback_for(address: &str) -> Self {
        match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => AddressFamily::V4,
            _ => AddressFamily::V6,
        }
    }

    fn matches(self, ip: &IpAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => ip.is_ipv4(),
            AddressFamily::V6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Any => write!(f, "any"),
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

/// Successful answer from one check attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub rtt: Duration,
    pub resolved: Option<IpAddr>,
}

/// One transport attempt against an address.
///
/// Implementations may take longer than `timeout`, the executor enforces the
/// overall deadline and folds errors into an unreachable result.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, address: &str, family: AddressFamily, timeout: Duration) -> Result<Reply>;
}

/// ICMP echo through the platform `ping` utility
pub struct PingChecker {
    program: String,
}

impl Default for PingChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl PingChecker {
    pub fn new() -> Self {
        Self { program: "ping".to_string() }
    }

    /// Use another executable, mostly useful for tests and odd installs
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, address: &str, family: AddressFamily, timeout: Duration) -> Result<Reply> {
        let start = Instant::now();

        let output = Command::new(ping_program(&self.program, family))
            .args(ping_args(address, family, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to execute `{}`", self.program))?;

        let elapsed = start.elapsed();

        if !output.status.success() {
            bail!("ping {address} over {family} failed: {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Reply {
            rtt: parse_rtt(&stdout).unwrap_or(elapsed),
            resolved: parse_resolved(&stdout),
        })
    }
}

/// Executable for `family`, macOS ships IPv6 echo as a separate `ping6`
fn ping_program(program: &str, family: AddressFamily) -> &str {
    if cfg!(target_os = "macos") && program == "ping" && family == AddressFamily::V6 {
        "ping6"
    } else {
        program
    }
}

/// Arguments for a single echo request bounded by `timeout`
pub fn ping_args(address: &str, family: AddressFamily, timeout: Duration) -> Vec<String> {
    let mut args = Vec::new();
    // macOS ping has no family flags, the program picks it
    if !cfg!(target_os = "macos") {
        match family {
            AddressFamily::Any => {}
            AddressFamily::V4 => args.push("-4".to_string()),
            AddressFamily::V6 => args.push("-6".to_string()),
        }
    }

    // whole seconds only, never below one
    let secs = (timeout.as_secs_f64().ceil().max(1.0) as u64).to_string();

    if cfg!(windows) {
        let millis = timeout.as_millis().max(1);
        args.extend(["-n".to_string(), "1".to_string(), "-w".to_string(), millis.to_string()]);
    } else if cfg!(target_os = "macos") && family == AddressFamily::V6 {
        // ping6 has no overall deadline, the executor bounds the attempt
        args.extend(["-n".to_string(), "-c".to_string(), "1".to_string()]);
    } else if cfg!(target_os = "macos") {
        // -W is milliseconds here, -t is the overall deadline in seconds
        args.extend(["-n".to_string(), "-c".to_string(), "1".to_string(), "-t".to_string(), secs]);
    } else {
        args.extend(["-n".to_string(), "-c".to_string(), "1".to_string(), "-W".to_string(), secs]);
    }

    args.push(address.to_string());
    args
}

/// Round trip reported by ping, e.g. `time=12.3 ms` or `time<1ms`
pub fn parse_rtt(output: &str) -> Option<Duration> {
    output.lines().find_map(|line| {
        let idx = line.find("time=").or_else(|| line.find("time<"))?;
        let value: String = line[idx + 5..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let millis = value.parse::<f64>().ok()?;
        Some(Duration::from_micros((millis * 1000.0).round() as u64))
    })
}

/// First IP address ping mentions, bracketed forms first
pub fn parse_resolved(output: &str) -> Option<IpAddr> {
    let parse = |raw: &str| {
        let raw = raw.split('%').next().unwrap_or(raw);
        raw.trim_matches(|c: char| c == ':' || c == ',').parse::<IpAddr>().ok()
    };

    let first_line = output.lines().find(|line| !line.trim().is_empty())?;
    for (open, close) in [('(', ')'), ('[', ']')] {
        if let Some(start) = first_line.find(open) {
            if let Some(len) = first_line[start + 1..].find(close) {
                if let Some(ip) = parse(&first_line[start + 1..start + 1 + len]) {
                    return Some(ip);
                }
            }
        }
    }

    output.split_whitespace().find_map(parse)
}

/// TCP connect to `host:port`, plain hosts use `default_port`
pub struct TcpChecker {
    default_port: u16,
}

impl TcpChecker {
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    fn split_host_port<'a>(&self, address: &'a str) -> (&'a str, u16) {
        if address.parse::<IpAddr>().is_ok() {
            return (address, self.default_port);
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => (address, self.default_port),
            },
            Some((host, port)) if host.starts_with('[') && host.ends_with(']') => {
                match port.parse::<u16>() {
                    Ok(port) => (&host[1..host.len() - 1], port),
                    Err(_) => (address, self.default_port),
                }
            }
            _ => (address, self.default_port),
        }
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, address: &str, family: AddressFamily, timeout: Duration) -> Result<Reply> {
        let (host, port) = self.split_host_port(address);

        let target: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| anyhow!("failed to resolve {host}: {e}"))?
            .find(|addr| family.matches(&addr.ip()))
            .ok_or_else(|| anyhow!("no {family} address for {host}"))?;

        let start = Instant::now();
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target))
            .await
            .map_err(|_| anyhow!("TCP connection timeout"))?
            .map_err(|e| anyhow!("TCP connection failed: {}", e))?;

        Ok(Reply { rtt: start.elapsed(), resolved: Some(target.ip()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_family() {
        assert_eq!(AddressFamily::fallback_for("10.0.0.1"), AddressFamily::V6);
        assert_eq!(AddressFamily::fallback_for("example.com"), AddressFamily::V6);
        assert_eq!(AddressFamily::fallback_for("fe80::1"), AddressFamily::V4);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_ping_args_force_family() {
        let args = ping_args("example.com", AddressFamily::V6, Duration::from_millis(1500));
        assert_eq!(args.first().map(String::as_str), Some("-6"));
        assert_eq!(args.last().map(String::as_str), Some("example.com"));

        let args = ping_args("example.com", AddressFamily::Any, Duration::from_secs(1));
        assert!(!args.iter().any(|a| a == "-4" || a == "-6"));
    }

    #[cfg(all(not(windows), not(target_os = "macos")))]
    #[test]
    fn test_ping_args_round_timeout_up() {
        let args = ping_args("10.0.0.1", AddressFamily::Any, Duration::from_millis(1500));
        let idx = args.iter().position(|a| a == "-W").unwrap();
        assert_eq!(args[idx + 1], "2");

        let args = ping_args("10.0.0.1", AddressFamily::Any, Duration::from_millis(200));
        let idx = args.iter().position(|a| a == "-W").unwrap();
        assert_eq!(args[idx + 1], "1");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_macos_ping_uses_deadline_and_ping6() {
        let args = ping_args("10.0.0.1", AddressFamily::V4, Duration::from_millis(1500));
        assert_eq!(args, ["-n", "-c", "1", "-t", "2", "10.0.0.1"]);

        let args = ping_args("example.com", AddressFamily::V6, Duration::from_secs(1));
        assert!(!args.iter().any(|a| a == "-6" || a == "-W" || a == "-t"));
        assert_eq!(ping_program("ping", AddressFamily::V6), "ping6");
        assert_eq!(ping_program("ping", AddressFamily::Any), "ping");
    }

    #[test]
    fn test_ping_program_override_is_kept() {
        assert_eq!(ping_program("/opt/bin/ping", AddressFamily::V6), "/opt/bin/ping");
        assert_eq!(ping_program("ping", AddressFamily::V4), "ping");
    }

    #[test]
    fn test_parse_linux_output() {
        let output = "PING example.com (93.184.216.34) 56(84) bytes of data.\n\
                      64 bytes from 93.184.216.34: icmp_seq=1 ttl=56 time=11.8 ms\n";
        assert_eq!(parse_rtt(output), Some(Duration::from_micros(11_800)));
        assert_eq!(parse_resolved(output), Some("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn test_parse_windows_output() {
        let output = "\r\nPinging example.com [2606:2800:220:1:248:1893:25c8:1946] with 32 bytes of data:\r\n\
                      Reply from 2606:2800:220:1:248:1893:25c8:1946: time<1ms\r\n";
        assert_eq!(parse_rtt(output), Some(Duration::from_millis(1)));
        assert_eq!(
            parse_resolved(output),
            Some("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap())
        );
    }

    #[test]
    fn test_parse_without_brackets_falls_back_to_tokens() {
        let output = "Pinging 10.0.0.1 with 32 bytes of data:\nReply from 10.0.0.1: bytes=32 time=3ms TTL=64\n";
        assert_eq!(parse_resolved(output), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(parse_rtt(output), Some(Duration::from_millis(3)));
        assert_eq!(parse_rtt("no timing here"), None);
    }

    #[test]
    fn test_split_host_port() {
        let checker = TcpChecker::new(80);
        assert_eq!(checker.split_host_port("example.com"), ("example.com", 80));
        assert_eq!(checker.split_host_port("example.com:8443"), ("example.com", 8443));
        assert_eq!(checker.split_host_port("::1"), ("::1", 80));
        assert_eq!(checker.split_host_port("[::1]:22"), ("::1", 22));
        assert_eq!(checker.split_host_port("10.0.0.1"), ("10.0.0.1", 80));
    }

    #[tokio::test]
    async fn test_tcp_check_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let checker = TcpChecker::new(port);
        let reply = checker
            .check("127.0.0.1", AddressFamily::Any, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.resolved, Some("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_tcp_check_wrong_family_fails() {
        let checker = TcpChecker::new(80);
        let result = checker.check("127.0.0.1", AddressFamily::V6, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ping_missing_program_is_an_error() {
        let checker = PingChecker::with_program("pingmon-no-such-ping-binary");
        let result = checker.check("127.0.0.1", AddressFamily::Any, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
