use anyhow::{Context, Result, bail};
use std::fmt;

/// macOS privacy permissions ScreenCal depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Required for `screencapture` to see anything but the desktop.
    ScreenRecording,
    /// Optional; lets capture context include window titles.
    Accessibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    NotSupported,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted | PermissionStatus::NotSupported)
    }

    pub fn needs_user_action(&self) -> bool {
        matches!(self, PermissionStatus::Denied)
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionStatus::Granted => "granted",
            PermissionStatus::Denied => "denied",
            PermissionStatus::NotSupported => "not required on this platform",
        })
    }
}

impl Permission {
    pub const ALL: [Permission; 2] = [Permission::ScreenRecording, Permission::Accessibility];

    pub fn label(&self) -> &'static str {
        match self {
            Permission::ScreenRecording => "Screen Recording",
            Permission::Accessibility => "Accessibility",
        }
    }

    pub fn status(&self) -> PermissionStatus {
        #[cfg(target_os = "macos")]
        {
            // SAFETY: both calls are side-effect free preflight checks.
            let granted = unsafe {
                match self {
                    Permission::ScreenRecording => CGPreflightScreenCaptureAccess(),
                    Permission::Accessibility => AXIsProcessTrusted(),
                }
            };
            if granted {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            }
        }

        #[cfg(not(target_os = "macos"))]
        {
            PermissionStatus::NotSupported
        }
    }

    pub fn settings_url(&self) -> &'static str {
        match self {
            Permission::ScreenRecording => {
                "x-apple.systempreferences:com.apple.preference.security?Privacy_ScreenRecording"
            }
            Permission::Accessibility => {
                "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility"
            }
        }
    }

    pub fn help_message(&self) -> String {
        format!(
            "Grant {label} permission: System Settings -> Privacy & Security -> {label}. Toggle ScreenCal on, then relaunch.",
            label = self.label()
        )
    }

    pub fn open_settings(&self) -> Result<()> {
        if !cfg!(target_os = "macos") {
            bail!("{} permission is not required on this platform", self.label());
        }
        opener::open(self.settings_url())
            .with_context(|| format!("failed to open {} settings", self.label()))
    }
}

/// One line per permission, for `screencal permissions` and the menubar log.
pub fn permission_report() -> Vec<(Permission, PermissionStatus)> {
    Permission::ALL
        .into_iter()
        .map(|permission| (permission, permission.status()))
        .collect()
}

#[cfg(target_os = "macos")]
#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn CGPreflightScreenCaptureAccess() -> bool;
    fn AXIsProcessTrusted() -> bool;
}

#[cfg(test)]
mod tests {
    use super::{Permission, PermissionStatus, permission_report};

    #[test]
    fn denied_is_the_only_status_needing_action() {
        assert!(PermissionStatus::Denied.needs_user_action());
        assert!(!PermissionStatus::Denied.is_granted());
        assert!(PermissionStatus::NotSupported.is_granted());
    }

    #[test]
    fn help_names_the_permission() {
        let help = Permission::ScreenRecording.help_message();
        assert!(help.contains("Screen Recording"));
        assert!(help.contains("ScreenCal"));
        assert!(Permission::Accessibility.settings_url().ends_with("Privacy_Accessibility"));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn reports_not_supported_off_macos() {
        let report = permission_report();
        assert_eq!(report.len(), 2);
        assert!(
            report
                .iter()
                .all(|(_, status)| *status == PermissionStatus::NotSupported)
        );
        assert!(Permission::ScreenRecording.open_settings().is_err());
    }
}
