use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://api.shaped.ai";
pub const DEFAULT_DOCS_SITE_URL: &str = "https://docs.shaped.ai/docs/v2";
pub const DEFAULT_MAX_TOKENS: u32 = 20_000;
pub const DEFAULT_THINKING_BUDGET: u32 = 10_000;
pub const DEFAULT_MAX_STEPS: usize = 8;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const MIN_THINKING_BUDGET: u32 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelParams {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// `Some(0)` turns extended thinking off.
    pub thinking_budget: Option<u32>,
}

/// One source of configuration. Every field is optional so layers can be
/// stacked: command line over environment over built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SettingsLayer {
    pub model_params: Option<ModelParams>,
    pub model_api_key: Option<String>,
    pub model_base_url: Option<String>,
    pub search_api_key: Option<String>,
    pub search_base_url: Option<String>,
    pub docs_site_url: Option<String>,
    pub max_steps: Option<usize>,
    pub fetch_timeout_secs: Option<u64>,
}

impl SettingsLayer {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let model_params = ModelParams {
            model: non_empty("DOCS_MODEL"),
            max_tokens: non_empty("DOCS_MAX_TOKENS").and_then(|v| v.parse().ok()),
            thinking_budget: non_empty("DOCS_THINKING_BUDGET").and_then(|v| v.parse().ok()),
        };
        Self {
            model_params: (model_params != ModelParams::default()).then_some(model_params),
            model_api_key: non_empty("ANTHROPIC_API_KEY"),
            model_base_url: non_empty("ANTHROPIC_BASE_URL"),
            search_api_key: non_empty("SEARCH_API_KEY"),
            search_base_url: non_empty("SEARCH_BASE_URL"),
            docs_site_url: non_empty("DOCS_SITE_URL"),
            max_steps: None,
            fetch_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub docs_site_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub model: ModelSettings,
    pub search: SearchSettings,
    pub max_steps: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        layer(&SettingsLayer::default(), &SettingsLayer::default())
    }
}

pub fn resolve_settings(env: &SettingsLayer, cli: &SettingsLayer) -> anyhow::Result<Settings> {
    let settings = layer(env, cli);
    check_thinking_budget(&settings.model)?;
    Ok(settings)
}

/// The provider rejects budgets under its minimum and budgets that leave no
/// room for the answer inside `max_tokens`.
fn check_thinking_budget(model: &ModelSettings) -> anyhow::Result<()> {
    let Some(budget) = model.thinking_budget else {
        return Ok(());
    };
    if budget < MIN_THINKING_BUDGET {
        anyhow::bail!(
            "thinking budget {budget} is below the minimum of {MIN_THINKING_BUDGET} (use 0 to disable thinking)"
        );
    }
    if budget >= model.max_tokens {
        anyhow::bail!(
            "thinking budget {budget} must be less than max_tokens {} (lower DOCS_THINKING_BUDGET or set it to 0)",
            model.max_tokens
        );
    }
    Ok(())
}

fn layer(env: &SettingsLayer, cli: &SettingsLayer) -> Settings {
    let model = cli
        .model_params
        .as_ref()
        .and_then(|p| p.model.clone())
        .or_else(|| env.model_params.as_ref().and_then(|p| p.model.clone()))
        .unwrap_or_else(|| DEFAULT_MODEL.into());

    let max_tokens = cli
        .model_params
        .as_ref()
        .and_then(|p| p.max_tokens)
        .or_else(|| env.model_params.as_ref().and_then(|p| p.max_tokens))
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let thinking_budget = cli
        .model_params
        .as_ref()
        .and_then(|p| p.thinking_budget)
        .or_else(|| env.model_params.as_ref().and_then(|p| p.thinking_budget))
        .unwrap_or(DEFAULT_THINKING_BUDGET);

    Settings {
        model: ModelSettings {
            model,
            max_tokens,
            thinking_budget: (thinking_budget > 0).then_some(thinking_budget),
            api_key: pick(&cli.model_api_key, &env.model_api_key),
            base_url: pick(&cli.model_base_url, &env.model_base_url)
                .unwrap_or_else(|| DEFAULT_MODEL_BASE_URL.into()),
        },
        search: SearchSettings {
            api_key: pick(&cli.search_api_key, &env.search_api_key),
            base_url: pick(&cli.search_base_url, &env.search_base_url)
                .unwrap_or_else(|| DEFAULT_SEARCH_BASE_URL.into()),
            docs_site_url: pick(&cli.docs_site_url, &env.docs_site_url)
                .unwrap_or_else(|| DEFAULT_DOCS_SITE_URL.into()),
        },
        max_steps: cli.max_steps.or(env.max_steps).unwrap_or(DEFAULT_MAX_STEPS),
        fetch_timeout_secs: cli
            .fetch_timeout_secs
            .or(env.fetch_timeout_secs)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
    }
}

fn pick(cli: &Option<String>, env: &Option<String>) -> Option<String> {
    cli.clone().or_else(|| env.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn precedence_cli_over_env_over_defaults() {
        let env = SettingsLayer {
            model_params: Some(ModelParams {
                model: Some("env-model".into()),
                max_tokens: Some(4096),
                thinking_budget: Some(2048),
            }),
            model_api_key: Some("env-key".into()),
            search_base_url: Some("http://search.internal".into()),
            ..Default::default()
        };
        let cli = SettingsLayer {
            model_params: Some(ModelParams {
                model: None,
                max_tokens: Some(8192),
                thinking_budget: None,
            }),
            search_base_url: Some("http://127.0.0.1:9000".into()),
            max_steps: Some(3),
            ..Default::default()
        };

        let s = resolve_settings(&env, &cli).unwrap();

        assert_eq!(s.model.model, "env-model"); // from env
        assert_eq!(s.model.max_tokens, 8192); // from cli
        assert_eq!(s.model.thinking_budget, Some(2048)); // from env
        assert_eq!(s.model.api_key.as_deref(), Some("env-key"));
        assert_eq!(s.model.base_url, DEFAULT_MODEL_BASE_URL); // default
        assert_eq!(s.search.base_url, "http://127.0.0.1:9000"); // from cli
        assert_eq!(s.search.docs_site_url, DEFAULT_DOCS_SITE_URL);
        assert_eq!(s.max_steps, 3);
        assert_eq!(s.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
    }

    #[test]
    fn zero_thinking_budget_disables_thinking() {
        let cli = SettingsLayer {
            model_params: Some(ModelParams { thinking_budget: Some(0), ..Default::default() }),
            ..Default::default()
        };
        let s = resolve_settings(&SettingsLayer::default(), &cli).unwrap();
        assert_eq!(s.model.thinking_budget, None);
    }

    #[test]
    fn env_lookup_ignores_blank_and_unparseable_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("SEARCH_API_KEY", "  "),
            ("DOCS_MAX_TOKENS", "lots"),
            ("DOCS_MODEL", "claude-test"),
        ]);
        let layer = SettingsLayer::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(layer.model_api_key.as_deref(), Some("sk-test"));
        assert_eq!(layer.search_api_key, None);
        let params = layer.model_params.unwrap();
        assert_eq!(params.model.as_deref(), Some("claude-test"));
        assert_eq!(params.max_tokens, None);
    }

    #[test]
    fn default_budget_over_lowered_max_tokens_is_rejected() {
        let vars: HashMap<&str, &str> = HashMap::from([("DOCS_MAX_TOKENS", "4096")]);
        let env = SettingsLayer::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        let err = resolve_settings(&env, &SettingsLayer::default()).unwrap_err();
        assert!(err.to_string().contains("must be less than max_tokens 4096"));

        let cli = SettingsLayer {
            model_params: Some(ModelParams { thinking_budget: Some(0), ..Default::default() }),
            ..Default::default()
        };
        let s = resolve_settings(&env, &cli).unwrap();
        assert_eq!(s.model.max_tokens, 4096);
        assert_eq!(s.model.thinking_budget, None);
    }

    #[test]
    fn budget_below_provider_minimum_is_rejected() {
        let cli = SettingsLayer {
            model_params: Some(ModelParams { thinking_budget: Some(512), ..Default::default() }),
            ..Default::default()
        };
        let err = resolve_settings(&SettingsLayer::default(), &cli).unwrap_err();
        assert!(err.to_string().contains("below the minimum of 1024"));
    }

    #[test]
    fn defaults_resolve() {
        let s = resolve_settings(&SettingsLayer::default(), &SettingsLayer::default()).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.model.thinking_budget, Some(DEFAULT_THINKING_BUDGET));
    }

    #[test]
    fn api_keys_are_not_serialized() {
        let mut s = Settings::default();
        s.model.api_key = Some("secret".into());
        s.search.api_key = Some("secret".into());
        let out = serde_json::to_string(&s).unwrap();
        assert!(!out.contains("secret"));
    }
}
