//! Declarative scenario definitions.
//!
//! A scenario is data consumed generically by the orchestrator: an ordered
//! list of named steps, each holding the UI action primitives to run. New
//! scenarios are TOML files in the store directory, not new control flow.

use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};
use uiproof_common::{Error, Result};

/// One scripted UI action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Navigate the browser to a URL
    Navigate { url: String },

    /// Switch into a named frame
    SwitchFrame { frame: String },

    /// Fill an input located by its name attribute
    Fill { field: String, value: String },

    /// Send keys to the active element
    SendKeys { text: String },

    /// Press a named key, optionally repeated
    PressKey {
        key: String,
        #[serde(default = "default_times")]
        times: u32,
        #[serde(default)]
        delay_ms: u64,
    },

    /// Click the on-screen control recorded as an image template
    ClickImage { template: String },

    /// Capture a screenshot and store it under the given label
    Screenshot { label: String },

    /// Capture a before/after screenshot pair around a settle wait,
    /// stored for offline visual comparison
    CompareScreens {
        label: String,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },

    /// Fixed wait tolerating the application's latency
    Sleep { ms: u64 },
}

fn default_times() -> u32 {
    1
}

fn default_settle_ms() -> u64 {
    1000
}

/// One named phase of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    pub description: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Result text recorded when the step completes
    #[serde(default = "default_on_success")]
    pub on_success: String,
}

fn default_on_success() -> String {
    "Completed".to_string()
}

/// A complete scripted business scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub module: String,
    pub name: String,
    pub steps: Vec<StepDef>,
}

impl Scenario {
    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "scenario {}/{} has no steps",
                self.module, self.name
            )));
        }
        Ok(())
    }
}

/// Registry of scenario overrides plus the built-in legacy scenario
#[derive(Clone, Default)]
pub struct ScenarioSet {
    overrides: HashMap<(String, String), Scenario>,
}

impl ScenarioSet {
    /// Load scenario override files (`*.toml`) from a directory.
    /// A missing directory is fine; malformed files are skipped with a
    /// warning so one bad override cannot block every run.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut overrides = HashMap::new();

        if !dir.exists() {
            return Ok(Self { overrides });
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|raw| {
                    toml::from_str::<Scenario>(&raw)
                        .map_err(|e| Error::InvalidConfig(e.to_string()))
                }) {
                Ok(scenario) => {
                    if let Err(e) = scenario.validate() {
                        warn!("Skipping scenario {:?}: {}", path, e);
                        continue;
                    }
                    info!(
                        "Loaded scenario override {}/{} from {:?}",
                        scenario.module, scenario.name, path
                    );
                    overrides.insert(
                        (scenario.module.clone(), scenario.name.clone()),
                        scenario,
                    );
                }
                Err(e) => warn!("Skipping scenario file {:?}: {}", path, e),
            }
        }

        Ok(Self { overrides })
    }

    /// Resolve the scenario for a run: an override when one exists,
    /// otherwise the built-in legacy script parameterized by module code.
    pub fn resolve(&self, module: &str, scenario: &str, config: &EngineConfig) -> Scenario {
        self.overrides
            .get(&(module.to_string(), scenario.to_string()))
            .cloned()
            .unwrap_or_else(|| builtin_scenario(module, scenario, config))
    }
}

/// The legacy five-step scenario: browser init, login, navigate-and-input,
/// validate, cleanup.
pub fn builtin_scenario(module: &str, scenario: &str, config: &EngineConfig) -> Scenario {
    let login = &config.login;
    Scenario {
        module: module.to_string(),
        name: scenario.to_string(),
        steps: vec![
            StepDef {
                description: "Browser initialization".to_string(),
                actions: vec![],
                on_success: "Browser session initialized".to_string(),
            },
            StepDef {
                description: "Application login".to_string(),
                actions: vec![
                    Action::Navigate {
                        url: config.base_url.clone(),
                    },
                    Action::Sleep { ms: 2000 },
                    Action::SwitchFrame {
                        frame: login.frame.clone(),
                    },
                    Action::Fill {
                        field: login.user_field.clone(),
                        value: login.username.clone(),
                    },
                    Action::Fill {
                        field: login.password_field.clone(),
                        value: login.password.clone(),
                    },
                    Action::PressKey {
                        key: "enter".to_string(),
                        times: 1,
                        delay_ms: 0,
                    },
                ],
                on_success: "Login successful".to_string(),
            },
            StepDef {
                description: "Navigation and data entry".to_string(),
                actions: vec![
                    Action::Sleep { ms: 3000 },
                    Action::SendKeys {
                        text: module.to_string(),
                    },
                    Action::PressKey {
                        key: "enter".to_string(),
                        times: 1,
                        delay_ms: 0,
                    },
                    Action::Sleep { ms: 3000 },
                    Action::ClickImage {
                        template: "boutonVoulezVous.PNG".to_string(),
                    },
                    Action::PressKey {
                        key: "tab".to_string(),
                        times: 22,
                        delay_ms: 100,
                    },
                    Action::PressKey {
                        key: "enter".to_string(),
                        times: 1,
                        delay_ms: 0,
                    },
                    Action::ClickImage {
                        template: "BoutonValider.PNG".to_string(),
                    },
                    Action::CompareScreens {
                        label: "entry".to_string(),
                        settle_ms: 5000,
                    },
                ],
                on_success: "Navigation and data entry complete".to_string(),
            },
            StepDef {
                description: "Validation of changes".to_string(),
                actions: vec![
                    Action::ClickImage {
                        template: "boutonSelect.PNG".to_string(),
                    },
                    Action::Sleep { ms: 5000 },
                    Action::ClickImage {
                        template: "boutonVoulezVous.PNG".to_string(),
                    },
                    Action::PressKey {
                        key: "tab".to_string(),
                        times: 4,
                        delay_ms: 100,
                    },
                    Action::PressKey {
                        key: "enter".to_string(),
                        times: 1,
                        delay_ms: 0,
                    },
                    Action::Sleep { ms: 2000 },
                    Action::ClickImage {
                        template: "BoutonValider.PNG".to_string(),
                    },
                    Action::ClickImage {
                        template: "boutonRetour.PNG".to_string(),
                    },
                ],
                on_success: "Changes validated".to_string(),
            },
            StepDef {
                description: "Cleanup and session close".to_string(),
                actions: vec![],
                on_success: "Cleanup complete".to_string(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_five_named_steps() {
        let cfg = EngineConfig::default();
        let scenario = builtin_scenario("CTC110M", "demo", &cfg);
        assert_eq!(scenario.steps.len(), 5);
        assert!(scenario.steps[0].actions.is_empty());
        assert_eq!(scenario.steps[1].description, "Application login");
        // module code is injected into the entry step
        assert!(scenario.steps[2]
            .actions
            .iter()
            .any(|a| matches!(a, Action::SendKeys { text } if text == "CTC110M")));
    }

    #[test]
    fn toml_override_parses() {
        let scenario: Scenario = toml::from_str(
            r#"
            module = "COX200M"
            name = "rent_review"

            [[steps]]
            description = "Open module"

            [[steps.actions]]
            action = "navigate"
            url = "http://ikos.local"

            [[steps.actions]]
            action = "press_key"
            key = "tab"
            times = 3
            "#,
        )
        .unwrap();
        assert_eq!(scenario.steps.len(), 1);
        assert_eq!(
            scenario.steps[0].actions[1],
            Action::PressKey {
                key: "tab".into(),
                times: 3,
                delay_ms: 0
            }
        );
        assert_eq!(scenario.steps[0].on_success, "Completed");
    }

    #[test]
    fn compare_screens_parses_with_default_settle() {
        let scenario: Scenario = toml::from_str(
            r#"
            module = "CTC110M"
            name = "visual"

            [[steps]]
            description = "Data entry"
            actions = [
                { action = "compare_screens", label = "entry" },
                { action = "compare_screens", label = "quick", settle_ms = 250 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(
            scenario.steps[0].actions[0],
            Action::CompareScreens {
                label: "entry".into(),
                settle_ms: 1000
            }
        );
        assert_eq!(
            scenario.steps[0].actions[1],
            Action::CompareScreens {
                label: "quick".into(),
                settle_ms: 250
            }
        );
    }

    #[test]
    fn load_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.toml"),
            r#"
            module = "CTC110M"
            name = "custom"

            [[steps]]
            description = "only step"
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.toml"), "not toml at all [").unwrap();

        let set = ScenarioSet::load(dir.path()).unwrap();
        let cfg = EngineConfig::default();
        let resolved = set.resolve("CTC110M", "custom", &cfg);
        assert_eq!(resolved.steps.len(), 1);

        // unknown pair falls back to the builtin
        let fallback = set.resolve("CTC110M", "demo", &cfg);
        assert_eq!(fallback.steps.len(), 5);
    }
}
