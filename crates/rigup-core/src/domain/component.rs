//! Desktop components, preflight/diagnostic check identifiers, and the
//! `Subject` tag every operation result carries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// A selectable piece of the desktop environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// The window manager itself (sway)
    Core,
    /// Runtime pieces the window manager needs (xwayland, portals, idle/lock)
    CoreDependency,
    StatusBar,
    Terminal,
    Launcher,
    Notifications,
    DisplayManager,
    Audio,
    Network,
    GpuDriver,
    Wallpaper,
    Fonts,
}

/// A systemd unit a component relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: String,
    /// Managed with `systemctl --user` rather than system-wide
    pub user: bool,
}

impl ServiceUnit {
    pub fn system(name: &str) -> Self {
        Self {
            name: name.to_string(),
            user: false,
        }
    }

    pub fn user(name: &str) -> Self {
        Self {
            name: name.to_string(),
            user: true,
        }
    }
}

impl fmt::Display for ServiceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user {
            write!(f, "{} (user)", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

impl Component {
    pub const ALL: [Component; 12] = [
        Component::Core,
        Component::CoreDependency,
        Component::StatusBar,
        Component::Terminal,
        Component::Launcher,
        Component::Notifications,
        Component::DisplayManager,
        Component::Audio,
        Component::Network,
        Component::GpuDriver,
        Component::Wallpaper,
        Component::Fonts,
    ];

    /// Stable tag used in requests, results and history.
    pub fn tag(&self) -> &'static str {
        match self {
            Component::Core => "core",
            Component::CoreDependency => "core-dependency",
            Component::StatusBar => "status-bar",
            Component::Terminal => "terminal",
            Component::Launcher => "launcher",
            Component::Notifications => "notifications",
            Component::DisplayManager => "display-manager",
            Component::Audio => "audio",
            Component::Network => "network",
            Component::GpuDriver => "gpu-driver",
            Component::Wallpaper => "wallpaper",
            Component::Fonts => "fonts",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Component::Core => "Sway tiling Wayland compositor",
            Component::CoreDependency => "XWayland, desktop portal, idle and lock helpers",
            Component::StatusBar => "Waybar status bar",
            Component::Terminal => "Foot terminal emulator",
            Component::Launcher => "Wofi application launcher",
            Component::Notifications => "Mako notification daemon",
            Component::DisplayManager => "greetd login manager with tuigreet",
            Component::Audio => "PipeWire audio stack",
            Component::Network => "NetworkManager",
            Component::GpuDriver => "Proprietary GPU driver",
            Component::Wallpaper => "swaybg wallpaper setter",
            Component::Fonts => "Noto and Font Awesome fonts",
        }
    }

    /// Debian packages installed for this component.
    ///
    /// `GpuDriver` lists the NVIDIA set; other vendors override it through
    /// the selection's package metadata.
    pub fn packages(&self) -> &'static [&'static str] {
        match self {
            Component::Core => &["sway"],
            Component::CoreDependency => &[
                "xwayland",
                "dbus-user-session",
                "xdg-desktop-portal-wlr",
                "swayidle",
                "swaylock",
            ],
            Component::StatusBar => &["waybar"],
            Component::Terminal => &["foot"],
            Component::Launcher => &["wofi"],
            Component::Notifications => &["mako-notifier", "libnotify-bin"],
            Component::DisplayManager => &["greetd", "tuigreet"],
            Component::Audio => &["pipewire", "pipewire-pulse", "wireplumber", "pavucontrol"],
            Component::Network => &["network-manager"],
            Component::GpuDriver => &["nvidia-driver", "firmware-misc-nonfree"],
            Component::Wallpaper => &["swaybg"],
            Component::Fonts => &["fonts-noto", "fonts-font-awesome"],
        }
    }

    /// Units that must be enabled and running after installation.
    pub fn services(&self) -> Vec<ServiceUnit> {
        match self {
            Component::DisplayManager => vec![ServiceUnit::system("greetd.service")],
            Component::Network => vec![ServiceUnit::system("NetworkManager.service")],
            Component::Audio => vec![
                ServiceUnit::user("pipewire.service"),
                ServiceUnit::user("pipewire-pulse.service"),
                ServiceUnit::user("wireplumber.service"),
            ],
            _ => Vec::new(),
        }
    }

    /// Components selected when a request does not name any.
    pub fn default_selection() -> Vec<Component> {
        vec![
            Component::Core,
            Component::CoreDependency,
            Component::StatusBar,
            Component::Terminal,
            Component::Launcher,
            Component::Notifications,
            Component::Fonts,
        ]
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Component {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Component::ALL
            .into_iter()
            .find(|c| c.tag() == wanted)
            .ok_or_else(|| ValidationError::UnknownComponent(s.to_string()))
    }
}

/// Identifier of a read-only preflight or diagnostic check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CheckId {
    Distribution,
    Privileges,
    DiskSpace,
    Memory,
    NetworkReachability,
    PackageLock,
    ExistingDesktop,
    Gpu,
    PackagesInstalled,
    ServicesActive,
    ConfigPresent,
}

impl CheckId {
    pub const ALL: [CheckId; 11] = [
        CheckId::Distribution,
        CheckId::Privileges,
        CheckId::DiskSpace,
        CheckId::Memory,
        CheckId::NetworkReachability,
        CheckId::PackageLock,
        CheckId::ExistingDesktop,
        CheckId::Gpu,
        CheckId::PackagesInstalled,
        CheckId::ServicesActive,
        CheckId::ConfigPresent,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            CheckId::Distribution => "distribution",
            CheckId::Privileges => "privileges",
            CheckId::DiskSpace => "disk-space",
            CheckId::Memory => "memory",
            CheckId::NetworkReachability => "network-reachability",
            CheckId::PackageLock => "package-lock",
            CheckId::ExistingDesktop => "existing-desktop",
            CheckId::Gpu => "gpu",
            CheckId::PackagesInstalled => "packages-installed",
            CheckId::ServicesActive => "services-active",
            CheckId::ConfigPresent => "config-present",
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CheckId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CheckId::ALL
            .into_iter()
            .find(|c| c.tag() == wanted)
            .ok_or_else(|| ValidationError::UnknownCheck(s.to_string()))
    }
}

/// What an operation result is about: a component or a check.
///
/// Serialized as the bare tag; component and check tags never collide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum Subject {
    Component(Component),
    Check(CheckId),
}

impl Subject {
    pub fn tag(&self) -> &'static str {
        match self {
            Subject::Component(c) => c.tag(),
            Subject::Check(c) => c.tag(),
        }
    }

    pub fn component(&self) -> Option<Component> {
        match self {
            Subject::Component(c) => Some(*c),
            Subject::Check(_) => None,
        }
    }
}

impl From<Component> for Subject {
    fn from(c: Component) -> Self {
        Subject::Component(c)
    }
}

impl From<CheckId> for Subject {
    fn from(c: CheckId) -> Self {
        Subject::Check(c)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Subject {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(c) = s.parse::<Component>() {
            return Ok(Subject::Component(c));
        }
        s.parse::<CheckId>()
            .map(Subject::Check)
            .map_err(|_| ValidationError::UnknownComponent(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_tags_round_trip() {
        for c in Component::ALL {
            assert_eq!(c.tag().parse::<Component>().unwrap(), c);
        }
    }

    #[test]
    fn test_component_serde_uses_tag() {
        let json = serde_json::to_string(&Component::CoreDependency).unwrap();
        assert_eq!(json, "\"core-dependency\"");
    }

    #[test]
    fn test_unknown_component_rejected() {
        let err = "kde".parse::<Component>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownComponent("kde".to_string()));
    }

    #[test]
    fn test_every_component_has_packages() {
        for c in Component::ALL {
            assert!(!c.packages().is_empty(), "{} has no packages", c);
        }
    }

    #[test]
    fn test_check_and_component_tags_disjoint() {
        for c in Component::ALL {
            assert!(c.tag().parse::<CheckId>().is_err());
        }
    }

    #[test]
    fn test_subject_serializes_bare_tag() {
        let s = Subject::Check(CheckId::DiskSpace);
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"disk-space\"");
        let back: Subject = serde_json::from_str("\"audio\"").unwrap();
        assert_eq!(back, Subject::Component(Component::Audio));
        assert_eq!("disk-space".parse::<Subject>().unwrap(), s);
    }

    #[test]
    fn test_default_selection_contains_core() {
        assert!(Component::default_selection().contains(&Component::Core));
    }

    #[test]
    fn test_audio_services_are_user_units() {
        assert!(Component::Audio.services().iter().all(|u| u.user));
        assert!(Component::DisplayManager.services().iter().all(|u| !u.user));
    }
}
