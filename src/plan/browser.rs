use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::project::settings::Dict;

/// Browsers a local driver can start without extra configuration.
pub const DEFAULT_BROWSERS: &[&str] = &[
    "chrome",
    "chrome-headless",
    "chrome-remote",
    "chrome-remote-headless",
    "edge",
    "edge-remote",
    "firefox",
    "firefox-headless",
    "firefox-remote",
    "firefox-remote-headless",
    "ie",
    "ie-remote",
    "opera",
    "opera-remote",
];

/// Used when neither CLI, suite nor settings name a browser.
pub const FALLBACK_BROWSER: &str = "chrome";

/// Driver definition for one browser entry of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserDefinition {
    pub name: String,
    pub full_name: Option<String>,
    pub remote: bool,
    pub capabilities: Dict,
}

impl BrowserDefinition {
    /// The name shown in reports: the remote alias when there is one.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.name)
    }
}

/// Which browser names to resolve: CLI, then suite, then the project's
/// default browser setting, then [`FALLBACK_BROWSER`].
pub fn select_browser_names(
    cli: &[String],
    suite: &[String],
    default_browser: Option<&str>,
) -> Vec<String> {
    if !cli.is_empty() {
        cli.to_vec()
    } else if !suite.is_empty() {
        suite.to_vec()
    } else if let Some(default) = default_browser.filter(|d| !d.is_empty()) {
        vec![default.to_owned()]
    } else {
        vec![FALLBACK_BROWSER.to_owned()]
    }
}

/// One driver definition per name, in order, duplicates kept.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownBrowser`] listing every valid name when a
/// name is neither a remote alias nor a known browser.
pub fn define_browsers(
    selected: &[String],
    remote_browsers: &BTreeMap<String, Dict>,
    default_browsers: &[&str],
) -> Result<Vec<BrowserDefinition>, ConfigError> {
    selected
        .iter()
        .map(|name| {
            if let Some(capabilities) = remote_browsers.get(name) {
                let driver_name = capabilities
                    .get("browserName")
                    .and_then(Value::as_str)
                    .unwrap_or(name)
                    .to_owned();
                Ok(BrowserDefinition {
                    name: driver_name,
                    full_name: Some(name.clone()),
                    remote: true,
                    capabilities: capabilities.clone(),
                })
            } else if default_browsers.contains(&name.as_str()) {
                Ok(BrowserDefinition {
                    name: name.clone(),
                    full_name: None,
                    remote: false,
                    capabilities: Dict::new(),
                })
            } else {
                let mut valid: Vec<String> =
                    default_browsers.iter().map(|b| (*b).to_owned()).collect();
                valid.extend(remote_browsers.keys().cloned());
                Err(ConfigError::UnknownBrowser {
                    name: name.clone(),
                    valid,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote() -> BTreeMap<String, Dict> {
        let mut caps = Dict::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("version".into(), json!("60.0"));
        let mut map = BTreeMap::new();
        map.insert("chrome_60_mac".to_string(), caps);
        map
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn remote_alias_resolves_to_driver_name() {
        let defs = define_browsers(&names(&["chrome_60_mac"]), &remote(), DEFAULT_BROWSERS).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "chrome");
        assert_eq!(defs[0].full_name.as_deref(), Some("chrome_60_mac"));
        assert!(defs[0].remote);
        assert_eq!(defs[0].capabilities["version"], "60.0");
        assert_eq!(defs[0].display_name(), "chrome_60_mac");
    }

    #[test]
    fn default_browser_is_local() {
        let defs = define_browsers(&names(&["firefox"]), &BTreeMap::new(), DEFAULT_BROWSERS).unwrap();
        assert_eq!(
            defs[0],
            BrowserDefinition {
                name: "firefox".into(),
                full_name: None,
                remote: false,
                capabilities: Dict::new(),
            }
        );
    }

    #[test]
    fn duplicates_and_order_preserved() {
        let defs = define_browsers(
            &names(&["firefox", "chrome", "firefox"]),
            &BTreeMap::new(),
            DEFAULT_BROWSERS,
        )
        .unwrap();
        let got: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(got, vec!["firefox", "chrome", "firefox"]);
    }

    #[test]
    fn unknown_browser_lists_defaults_and_remotes() {
        let err = define_browsers(&names(&["doesnotexist"]), &remote(), &["chrome"]).unwrap_err();
        match err {
            ConfigError::UnknownBrowser { name, valid } => {
                assert_eq!(name, "doesnotexist");
                assert_eq!(valid, names(&["chrome", "chrome_60_mac"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn selection_precedence() {
        assert_eq!(
            select_browser_names(&names(&["edge"]), &names(&["firefox"]), Some("ie")),
            names(&["edge"])
        );
        assert_eq!(
            select_browser_names(&[], &names(&["firefox"]), Some("ie")),
            names(&["firefox"])
        );
        assert_eq!(select_browser_names(&[], &[], Some("ie")), names(&["ie"]));
        assert_eq!(select_browser_names(&[], &[], None), names(&["chrome"]));
        assert_eq!(select_browser_names(&[], &[], Some("")), names(&["chrome"]));
    }
}
