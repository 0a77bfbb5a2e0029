//! Built-in configuration templates and `{{var}}` rendering.

use std::collections::HashMap;
use std::path::Path;

use rigup_core::{Component, ConfigFileSpec};

use crate::config::RigupConfig;

const SWAY: &str = include_str!("../templates/sway.config");
const WAYBAR: &str = include_str!("../templates/waybar.config");
const WAYBAR_STYLE: &str = include_str!("../templates/waybar.style.css");
const FOOT: &str = include_str!("../templates/foot.ini");
const WOFI: &str = include_str!("../templates/wofi.config");
const MAKO: &str = include_str!("../templates/mako.config");
const GREETD: &str = include_str!("../templates/greetd.config.toml");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("template references undefined variable {0:?}")]
    UndefinedVariable(String),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Configuration files deployed for `component`, targets resolved under `home`.
pub fn config_files(component: Component, home: &Path) -> Vec<ConfigFileSpec> {
    let user = |name: &str, template: &str, rel: &str| ConfigFileSpec {
        name: name.to_string(),
        component,
        template: template.to_string(),
        target: home.join(rel),
    };

    match component {
        Component::Core => vec![user("sway/config", SWAY, ".config/sway/config")],
        Component::StatusBar => vec![
            user("waybar/config", WAYBAR, ".config/waybar/config"),
            user("waybar/style.css", WAYBAR_STYLE, ".config/waybar/style.css"),
        ],
        Component::Terminal => vec![user("foot/foot.ini", FOOT, ".config/foot/foot.ini")],
        Component::Launcher => vec![user("wofi/config", WOFI, ".config/wofi/config")],
        Component::Notifications => vec![user("mako/config", MAKO, ".config/mako/config")],
        Component::DisplayManager => vec![ConfigFileSpec {
            name: "greetd/config.toml".to_string(),
            component,
            template: GREETD.to_string(),
            target: "/etc/greetd/config.toml".into(),
        }],
        _ => Vec::new(),
    }
}

/// Variables available to every template.
pub fn default_vars(config: &RigupConfig) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("home".to_string(), config.home_dir.display().to_string());
    vars.insert("terminal".to_string(), "foot".to_string());
    vars.insert("launcher".to_string(), "wofi --show drun".to_string());
    vars.insert("font".to_string(), "Noto Sans Mono 11".to_string());
    vars.insert("font_family".to_string(), "Noto Sans".to_string());
    vars.insert("keyboard_layout".to_string(), "us".to_string());
    vars.insert(
        "wallpaper".to_string(),
        config.wallpaper_cache().display().to_string(),
    );
    vars
}

/// Substitute every `{{name}}` in `template`. Whitespace inside the braces
/// is ignored; an unknown name is an error.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or(RenderError::Unterminated(offset + start))?;
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| RenderError::UndefinedVariable(name.to_string()))?;
        out.push_str(value);

        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        default_vars(&RigupConfig {
            home_dir: "/home/ada".into(),
            ..RigupConfig::default()
        })
    }

    #[test]
    fn test_render_substitutes() {
        let mut v = HashMap::new();
        v.insert("name".to_string(), "sway".to_string());
        assert_eq!(render("hello {{ name }}!", &v).unwrap(), "hello sway!");
    }

    #[test]
    fn test_render_leaves_single_braces() {
        let v = HashMap::new();
        assert_eq!(render("{volume}% {:%H}", &v).unwrap(), "{volume}% {:%H}");
    }

    #[test]
    fn test_render_errors() {
        let v = HashMap::new();
        assert_eq!(
            render("a {{missing}}", &v).unwrap_err(),
            RenderError::UndefinedVariable("missing".to_string())
        );
        assert_eq!(
            render("ab {{oops", &v).unwrap_err(),
            RenderError::Unterminated(3)
        );
    }

    #[test]
    fn test_every_builtin_template_renders() {
        let vars = vars();
        for component in Component::ALL {
            for spec in config_files(component, Path::new("/home/ada")) {
                let rendered = render(&spec.template, &vars)
                    .unwrap_or_else(|e| panic!("{} failed: {}", spec.name, e));
                assert!(!rendered.contains("{{"), "{} left a placeholder", spec.name);
            }
        }
    }

    #[test]
    fn test_user_targets_under_home() {
        let files = config_files(Component::StatusBar, Path::new("/home/ada"));
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.target.starts_with("/home/ada/.config")));
        assert!(config_files(Component::Audio, Path::new("/home/ada")).is_empty());
    }

    #[test]
    fn test_sway_config_uses_wallpaper_cache() {
        let files = config_files(Component::Core, Path::new("/home/ada"));
        let rendered = render(&files[0].template, &vars()).unwrap();
        assert!(rendered.contains("/home/ada/.cache/rigup/wallpaper"));
    }
}
