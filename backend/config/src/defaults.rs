//! Baseline blocklists. These are merged into every loaded policy and can never be removed.

use crate::schema::PolicyConfig;

/// Hosts that must never be fetched: loopback, private ranges, link-local and cloud metadata.
/// IPv4-mapped IPv6 literals are blocked wholesale since they can reach any IPv4 host.
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "localhost",
    "*.localhost",
    "127.*",
    "0.0.0.0",
    "::1",
    "[::1]",
    "[::]",
    "[::ffff:*",
    "10.*",
    "172.16.*",
    "172.17.*",
    "172.18.*",
    "172.19.*",
    "172.20.*",
    "172.21.*",
    "172.22.*",
    "172.23.*",
    "172.24.*",
    "172.25.*",
    "172.26.*",
    "172.27.*",
    "172.28.*",
    "172.29.*",
    "172.30.*",
    "172.31.*",
    "192.168.*",
    "169.254.*",
    "[fc*",
    "[fd*",
    "[fe80:*",
    "metadata.google.internal",
    "metadata",
    "*.internal",
    "*.local",
];

/// Executables that must never be run: privilege escalation, destructive disk/file tools,
/// system power control, and shells (which would reintroduce shell interpretation).
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    "rm",
    "rmdir",
    "sudo",
    "su",
    "doas",
    "dd",
    "mkfs*",
    "fdisk",
    "parted",
    "shred",
    "chmod",
    "chown",
    "chgrp",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "kill",
    "killall",
    "pkill",
    "sh",
    "bash",
    "zsh",
    "fish",
    "dash",
    "ksh",
    "csh",
    "eval",
    "exec",
    "xargs",
    "nc",
    "ncat",
    "netcat",
    "crontab",
];

/// Union the baseline blocklists into `config`. Allowlists are left as they are.
pub fn apply_baseline(mut config: PolicyConfig) -> PolicyConfig {
    config
        .blocked_domains
        .extend(DEFAULT_BLOCKED_DOMAINS.iter().map(|d| d.to_string()));
    config
        .blocked_commands
        .extend(DEFAULT_BLOCKED_COMMANDS.iter().map(|c| c.to_string()));
    config
}

/// A fresh policy: empty allowlists, baseline blocklists.
pub fn baseline_policy() -> PolicyConfig {
    apply_baseline(PolicyConfig::default())
}
