//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(name = "network-provisioning", version, author)]
#[clap(about = "Network provisioning manager serving a Unix socket scheme")]
pub struct CliArgs {
    /// Wireless network interface name
    #[clap(short, long, default_value = "wlan0")]
    pub interface: String,

    /// Path for Unix socket (ignored when a socket is passed by the service manager)
    #[clap(long, default_value = "/run/network-provisioning.sock")]
    pub socket_path: String,

    /// Socket file permissions (octal, e.g., 660)
    #[clap(long, default_value = "660")]
    pub socket_mode: String,

    /// Name clients discover the device by
    #[clap(short = 'n', long, default_value = "PROV_device")]
    pub service_name: String,

    /// Optional key clients need to access the service
    #[clap(long)]
    pub service_key: Option<String>,

    /// Security level of the provisioning session (0 or 1)
    #[clap(long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=1))]
    pub security: u8,

    /// Proof of possession for security level 1
    #[clap(short = 'p', long)]
    pub pop: Option<String>,

    /// Keep the session running after credentials were applied successfully
    #[clap(long)]
    pub disable_auto_stop: bool,

    /// Grace period before teardown once stop was requested, in milliseconds
    #[clap(long, default_value = "1000")]
    pub cleanup_delay_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["network-provisioning"]);
        assert_eq!(args.interface, "wlan0");
        assert_eq!(args.security, 1);
        assert_eq!(args.cleanup_delay_ms, 1000);
        assert!(!args.disable_auto_stop);
        assert!(args.pop.is_none());
    }

    #[test]
    fn test_security_level_range() {
        let result = CliArgs::try_parse_from(["network-provisioning", "--security", "2"]);
        assert!(result.is_err());
    }
}
