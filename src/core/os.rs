//! Snapshot of the host platform, taken once at startup and shared read-only.

use std::env;
use std::fmt;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::MacOs => "macOS",
            Self::Windows => "Windows",
            Self::Other => "Unknown",
        }
    }

    pub fn is_unix(&self) -> bool {
        !matches!(self, Self::Windows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    Bash,
    Zsh,
    Fish,
    Sh,
    PowerShell,
    Cmd,
}

impl ShellFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
            Self::Sh => "sh",
            Self::PowerShell => "powershell",
            Self::Cmd => "cmd",
        }
    }

    /// Maps a shell path such as `/usr/bin/zsh` to its family. Unknown shells
    /// are treated as bash, which is what most of them accept.
    pub fn from_shell_path(path: &str) -> Self {
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path)
            .trim_end_matches(".exe")
            .to_lowercase();
        match name.as_str() {
            "zsh" => Self::Zsh,
            "fish" => Self::Fish,
            "sh" | "dash" | "ash" => Self::Sh,
            "pwsh" | "powershell" => Self::PowerShell,
            "cmd" => Self::Cmd,
            _ => Self::Bash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsDescriptor {
    pub platform: Platform,
    /// Lower-case distribution id (`ubuntu`, `arch`, `macos`, `windows`).
    pub distro: String,
    pub version: String,
    pub architecture: String,
    pub shell: ShellFamily,
}

impl OsDescriptor {
    pub fn new(
        platform: Platform,
        distro: impl Into<String>,
        version: impl Into<String>,
        architecture: impl Into<String>,
        shell: ShellFamily,
    ) -> Self {
        Self {
            platform,
            distro: distro.into(),
            version: version.into(),
            architecture: architecture.into(),
            shell,
        }
    }

    pub fn detect() -> Self {
        let platform = match env::consts::OS {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Other,
        };

        let (distro, version) = match platform {
            Platform::Linux => std::fs::read_to_string("/etc/os-release")
                .map(|text| parse_os_release(&text))
                .unwrap_or_else(|_| ("linux".to_string(), "unknown".to_string())),
            Platform::MacOs => ("macos".to_string(), macos_version()),
            Platform::Windows => ("windows".to_string(), "unknown".to_string()),
            Platform::Other => (env::consts::OS.to_string(), "unknown".to_string()),
        };

        let shell = if platform == Platform::Windows {
            if env::var_os("PSModulePath").is_some() {
                ShellFamily::PowerShell
            } else {
                ShellFamily::Cmd
            }
        } else {
            env::var("SHELL")
                .map(|s| ShellFamily::from_shell_path(&s))
                .unwrap_or(ShellFamily::Sh)
        };

        let descriptor = Self::new(platform, distro, version, env::consts::ARCH, shell);
        tracing::debug!(os = %descriptor, "detected operating system");
        descriptor
    }

    /// Human-readable summary, used in prompts and `tai info`.
    pub fn display_name(&self) -> String {
        format!(
            "{} ({} {}, {}, {})",
            self.platform.as_str(),
            self.distro,
            self.version,
            self.architecture,
            self.shell.as_str()
        )
    }

    /// Groups distributions by package manager.
    pub fn distro_family(&self) -> Option<&'static str> {
        match self.distro.as_str() {
            "debian" | "ubuntu" | "linuxmint" | "pop" | "elementary" | "kali" | "raspbian" => {
                Some("debian")
            }
            "arch" | "manjaro" | "endeavouros" | "garuda" => Some("arch"),
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" | "amzn" => Some("fedora"),
            "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => Some("suse"),
            "alpine" => Some("alpine"),
            _ => None,
        }
    }
}

impl fmt::Display for OsDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Extracts `(ID, VERSION_ID)` from `/etc/os-release` content.
pub fn parse_os_release(text: &str) -> (String, String) {
    let mut id = None;
    let mut version = None;
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "ID" => id = Some(value.to_lowercase()),
            "VERSION_ID" => version = Some(value.to_string()),
            _ => {}
        }
    }
    (
        id.unwrap_or_else(|| "linux".to_string()),
        version.unwrap_or_else(|| "unknown".to_string()),
    )
}

fn macos_version() -> String {
    Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_os_release_fields() {
        let text = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\nID_LIKE=debian\n";
        assert_eq!(
            parse_os_release(text),
            ("ubuntu".to_string(), "22.04".to_string())
        );
    }

    #[test]
    fn os_release_without_version_falls_back() {
        let (id, version) = parse_os_release("ID=arch\nBUILD_ID=rolling\n");
        assert_eq!(id, "arch");
        assert_eq!(version, "unknown");
    }

    #[test]
    fn shell_family_from_path() {
        assert_eq!(ShellFamily::from_shell_path("/bin/zsh"), ShellFamily::Zsh);
        assert_eq!(ShellFamily::from_shell_path("/usr/bin/fish"), ShellFamily::Fish);
        assert_eq!(ShellFamily::from_shell_path("/bin/dash"), ShellFamily::Sh);
        assert_eq!(
            ShellFamily::from_shell_path("C:\\Program Files\\PowerShell\\pwsh.exe"),
            ShellFamily::PowerShell
        );
        assert_eq!(ShellFamily::from_shell_path("/opt/weird"), ShellFamily::Bash);
    }

    #[test]
    fn detect_fills_every_field() {
        let os = OsDescriptor::detect();
        assert!(!os.distro.is_empty());
        assert!(!os.version.is_empty());
        assert_eq!(os.architecture, env::consts::ARCH);
        assert!(!os.display_name().is_empty());
    }

    #[test]
    fn distro_family_groups_package_managers() {
        let os = OsDescriptor::new(Platform::Linux, "pop", "22.04", "x86_64", ShellFamily::Bash);
        assert_eq!(os.distro_family(), Some("debian"));
        let os = OsDescriptor::new(Platform::Linux, "void", "0", "x86_64", ShellFamily::Bash);
        assert_eq!(os.distro_family(), None);
    }
}
