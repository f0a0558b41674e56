use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::evaluator::DeliveryMode;
use crate::model::{Rule, Side};

const DEFAULT_PAYMENT_METHODS: &str = "377";
const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_ASSET: &str = "USDT";

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

/// Rules watched when no `RULES_FILE` is given.
fn default_rules() -> Vec<Rule> {
    vec![
        Rule::max("JPY", Side::Buy, 140.0),
        Rule::min("JPY", Side::Sell, 165.0),
        Rule::max("EUR", Side::Buy, 0.82),
        Rule::min("EUR", Side::Sell, 1.00),
        Rule::max("USD", Side::Buy, 0.9),
        Rule::max("GBP", Side::Buy, 0.75),
        Rule::min("GBP", Side::Sell, 0.888),
    ]
}

/// String that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierKind {
    Telegram { token: Secret },
    /// Log notifications instead of sending them.
    Terminal,
}

/// Optional read-only marketplace key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: Secret,
}

#[derive(Debug)]
pub struct AppConfig {
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    pub log_format: String,
    pub notifier: NotifierKind,
    pub chat_target: String,
    pub credentials: Option<Credentials>,
    pub payment_methods: BTreeSet<String>,
    pub interval: Duration,
    pub asset: String,
    pub rules: Vec<Rule>,
    pub delivery: DeliveryMode,
    pub startup_notice: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesFile {
    rules: Vec<Rule>,
}

/// Load and validate an `AppConfig` from the process environment.
pub fn from_env() -> Result<AppConfig, Report<ConfigError>> {
    load_with(|key| std::env::var(key).ok())
}

/// Load and validate an `AppConfig`, resolving each key through `lookup`.
///
/// Empty values are treated as unset.
pub fn load_with<F>(lookup: F) -> Result<AppConfig, Report<ConfigError>>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
    let require = |key: &str| {
        get(key).ok_or_else(|| Report::new(ConfigError::Missing { key: key.into() }))
    };

    let notifier = match get("NOTIFIER").as_deref() {
        None | Some("telegram") => NotifierKind::Telegram {
            token: Secret::new(require("TG_TOKEN")?),
        },
        Some("terminal") => NotifierKind::Terminal,
        Some(other) => {
            return Err(Report::new(ConfigError::Parse {
                key: "NOTIFIER".into(),
            })
            .attach(format!("unknown notifier \"{other}\"")));
        }
    };

    let chat_target = match notifier {
        NotifierKind::Telegram { .. } => require("TG_CHAT_ID")?,
        NotifierKind::Terminal => get("TG_CHAT_ID").unwrap_or_else(|| "terminal".into()),
    };

    let credentials = match (get("BYBIT_KEY"), get("BYBIT_SECRET")) {
        (Some(api_key), Some(secret)) => Some(Credentials {
            api_key,
            api_secret: Secret::new(secret),
        }),
        // A lone half of the pair falls back to public access.
        _ => None,
    };

    let payment_methods =
        parse_payment_methods(&get("REVOLUT_PM_IDS").unwrap_or_else(|| DEFAULT_PAYMENT_METHODS.into()));

    let interval_secs = match get("INTERVAL_SEC") {
        Some(raw) => parse_value::<u64>("INTERVAL_SEC", &raw)?,
        None => DEFAULT_INTERVAL_SECS,
    };

    let delivery = match get("DELIVERY_MODE") {
        Some(raw) => DeliveryMode::from_str(&raw).ok_or_else(|| {
            Report::new(ConfigError::Parse {
                key: "DELIVERY_MODE".into(),
            })
            .attach(format!("expected at-most-once or at-least-once, got \"{raw}\""))
        })?,
        None => DeliveryMode::default(),
    };

    let startup_notice = match get("STARTUP_NOTICE") {
        Some(raw) => parse_value::<bool>("STARTUP_NOTICE", &raw)?,
        None => true,
    };

    let rules = match get("RULES_FILE") {
        Some(path) => load_rules(Path::new(&path))?,
        None => default_rules(),
    };

    let config = AppConfig {
        log_level: get("LOG_LEVEL").unwrap_or_else(default_log_level),
        log_format: get("LOG_FORMAT").unwrap_or_else(default_log_format),
        notifier,
        chat_target,
        credentials,
        payment_methods,
        interval: Duration::from_secs(interval_secs),
        asset: get("P2P_ASSET").unwrap_or_else(|| DEFAULT_ASSET.into()),
        rules,
        delivery,
        startup_notice,
    };

    validate(&config)?;

    Ok(config)
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, Report<ConfigError>> {
    raw.parse::<T>().map_err(|_| {
        Report::new(ConfigError::Parse { key: key.into() }).attach(format!("value: {raw}"))
    })
}

fn parse_payment_methods(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Read `[[rules]]` tables from a TOML file at `path`.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    parse_rules(&content).attach_with(|| format!("path: {}", path.display()))
}

fn parse_rules(content: &str) -> Result<Vec<Rule>, Report<ConfigError>> {
    let file: RulesFile = toml::from_str(content).change_context(ConfigError::Parse {
        key: "RULES_FILE".into(),
    })?;
    Ok(file.rules)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_interval(config)?;
    validate_payment_methods(config)?;
    validate_log_format(config)?;
    validate_rules(&config.rules)?;
    Ok(())
}

fn validate_interval(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.interval.is_zero() {
        return Err(Report::new(ConfigError::Validation {
            field: "INTERVAL_SEC must be at least 1".into(),
        }));
    }
    Ok(())
}

fn validate_payment_methods(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.payment_methods.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "REVOLUT_PM_IDS lists no payment method".into(),
        }));
    }
    Ok(())
}

fn validate_log_format(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !matches!(config.log_format.as_str(), "text" | "json") {
        return Err(Report::new(ConfigError::Validation {
            field: format!("LOG_FORMAT \"{}\" is not text or json", config.log_format),
        }));
    }
    Ok(())
}

fn validate_rules(rules: &[Rule]) -> Result<(), Report<ConfigError>> {
    if rules.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "rules: at least one rule is required".into(),
        }));
    }

    for (index, rule) in rules.iter().enumerate() {
        if rule.currency.trim().is_empty() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("rules[{index}].currency is empty"),
            }));
        }

        if rule.max_price.is_none() && rule.min_price.is_none() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("rules[{index}] ({rule}) needs max_price or min_price"),
            }));
        }

        let bad_bound = [rule.max_price, rule.min_price]
            .into_iter()
            .flatten()
            .any(|p| !p.is_finite() || p < 0.0);
        if bad_bound {
            return Err(Report::new(ConfigError::Validation {
                field: format!("rules[{index}] ({rule}) has a negative or non-finite price"),
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, Report<ConfigError>> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        load_with(|key| env.get(key).cloned())
    }

    const TELEGRAM: &[(&str, &str)] = &[("TG_TOKEN", "123:abc"), ("TG_CHAT_ID", "@alerts")];

    #[test]
    fn defaults_applied_when_optional_keys_omitted() {
        let config = load(TELEGRAM).expect("load failed");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "text");
        assert_eq!(config.chat_target, "@alerts");
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.asset, "USDT");
        assert_eq!(config.payment_methods, BTreeSet::from(["377".to_owned()]));
        assert_eq!(config.delivery, DeliveryMode::AtMostOnce);
        assert!(config.startup_notice);
        assert!(config.credentials.is_none());
        assert_eq!(config.rules.len(), 7);
        assert!(matches!(config.notifier, NotifierKind::Telegram { .. }));
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = load(&[("TG_CHAT_ID", "@alerts")]).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::Missing { key } if key == "TG_TOKEN"
        ));
    }

    #[test]
    fn missing_chat_id_is_rejected() {
        let err = load(&[("TG_TOKEN", "123:abc")]).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::Missing { key } if key == "TG_CHAT_ID"
        ));
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let err = load(&[("TG_TOKEN", "  "), ("TG_CHAT_ID", "@alerts")]).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Missing { .. }));
    }

    #[test]
    fn terminal_notifier_needs_no_telegram_settings() {
        let config = load(&[("NOTIFIER", "terminal")]).expect("load failed");
        assert_eq!(config.notifier, NotifierKind::Terminal);
        assert_eq!(config.chat_target, "terminal");
    }

    #[test]
    fn unknown_notifier_rejected() {
        let err = load(&[("NOTIFIER", "email")]).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Parse { .. }));
    }

    #[test]
    fn payment_methods_are_split_and_trimmed() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("REVOLUT_PM_IDS", "377, 64 ,,14"));
        let config = load(&vars).expect("load failed");
        let expected: BTreeSet<String> = ["14", "377", "64"].map(str::to_owned).into();
        assert_eq!(config.payment_methods, expected);
    }

    #[test]
    fn payment_methods_of_only_commas_rejected() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("REVOLUT_PM_IDS", ",,"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn interval_must_be_a_positive_integer() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("INTERVAL_SEC", "ten"));
        assert!(load(&vars).is_err());

        let mut vars = TELEGRAM.to_vec();
        vars.push(("INTERVAL_SEC", "0"));
        assert!(load(&vars).is_err());

        let mut vars = TELEGRAM.to_vec();
        vars.push(("INTERVAL_SEC", "120"));
        assert_eq!(load(&vars).unwrap().interval, Duration::from_secs(120));
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("BYBIT_KEY", "key"));
        assert!(load(&vars).unwrap().credentials.is_none());

        vars.push(("BYBIT_SECRET", "secret"));
        let creds = load(&vars).unwrap().credentials.expect("credentials");
        assert_eq!(creds.api_key, "key");
        assert_eq!(creds.api_secret.expose(), "secret");
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("BYBIT_KEY", "key"));
        vars.push(("BYBIT_SECRET", "very-secret"));
        let rendered = format!("{:?}", load(&vars).unwrap());
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("123:abc"));
    }

    #[test]
    fn delivery_mode_parsed() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("DELIVERY_MODE", "at-least-once"));
        assert_eq!(load(&vars).unwrap().delivery, DeliveryMode::AtLeastOnce);

        let mut vars = TELEGRAM.to_vec();
        vars.push(("DELIVERY_MODE", "exactly-once"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn startup_notice_can_be_disabled() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("STARTUP_NOTICE", "false"));
        assert!(!load(&vars).unwrap().startup_notice);
    }

    #[test]
    fn non_boolean_startup_notice_rejected() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("STARTUP_NOTICE", "yes"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::Parse { key } if key == "STARTUP_NOTICE"
        ));
    }

    #[test]
    fn invalid_log_format_rejected() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("LOG_FORMAT", "xml"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn missing_rules_file_rejected() {
        let mut vars = TELEGRAM.to_vec();
        vars.push(("RULES_FILE", "/nonexistent/p2p-rules.toml"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::ReadFile));
    }

    #[test]
    fn rules_file_parses() {
        let toml = r#"
[[rules]]
currency = "EUR"
side = "buy"
max_price = 0.863
pm_required = true

[[rules]]
currency = "GBP"
side = "sell"
min_price = 0.888
"#;
        let rules = parse_rules(toml).expect("parse failed");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].side, Side::Buy);
        assert_eq!(rules[0].max_price, Some(0.863));
        assert!(rules[0].pm_required);
        assert_eq!(rules[1].min_price, Some(0.888));
        assert!(!rules[1].pm_required);
        assert!(validate_rules(&rules).is_ok());
    }

    #[test]
    fn example_rules_file_is_valid() {
        let rules = parse_rules(include_str!("../rules.example.toml")).expect("parse failed");
        assert_eq!(rules.len(), 3);
        assert!(validate_rules(&rules).is_ok());
    }

    #[test]
    fn rules_file_with_unknown_side_rejected() {
        let toml = r#"
[[rules]]
currency = "EUR"
side = "hold"
max_price = 1.0
"#;
        assert!(parse_rules(toml).is_err());
    }

    #[test]
    fn rule_without_bounds_rejected() {
        let toml = r#"
[[rules]]
currency = "EUR"
side = "buy"
"#;
        let rules = parse_rules(toml).expect("parse failed");
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn negative_bound_rejected() {
        let rules = vec![Rule::max("EUR", Side::Buy, -1.0)];
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn empty_rule_list_rejected() {
        assert!(parse_rules("rules = []").is_ok());
        assert!(validate_rules(&[]).is_err());
    }
}
