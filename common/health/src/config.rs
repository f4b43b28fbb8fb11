use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::shutdown::WaitBudget;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "HEALTH_SERVICE_NAME", default = "app")]
    pub service_name: String,

    /// Grace period between the `Down` transition and the first shutdown callback.
    #[envconfig(from = "SHUTDOWN_DELAY_MS", default = "0")]
    pub shutdown_delay: EnvMsDuration,

    /// How long `main` should wait for shutdown callbacks before exiting anyway.
    #[envconfig(from = "SHUTDOWN_TIMEOUT_MS", default = "30000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(from = "TRAP_SIGNALS", default = "true")]
    pub trap_signals: bool,
}

impl Config {
    /// Budget for the final [`Health::wait_for_completion`](crate::Health::wait_for_completion).
    pub fn wait_budget(&self) -> WaitBudget {
        WaitBudget::Timeout(self.shutdown_timeout.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.service_name, "app");
        assert_eq!(config.shutdown_delay, EnvMsDuration(Duration::ZERO));
        assert_eq!(config.shutdown_timeout, EnvMsDuration(Duration::from_secs(30)));
        assert!(config.trap_signals);
        assert!(matches!(
            config.wait_budget(),
            WaitBudget::Timeout(d) if d == Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<String, String> = [
            ("HEALTH_SERVICE_NAME", "capture"),
            ("SHUTDOWN_DELAY_MS", "5000"),
            ("SHUTDOWN_TIMEOUT_MS", "3000"),
            ("TRAP_SIGNALS", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.service_name, "capture");
        assert_eq!(config.shutdown_delay.0, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout.0, Duration::from_secs(3));
        assert!(!config.trap_signals);
    }

    #[test]
    fn test_invalid_duration() {
        assert_eq!("soon".parse::<EnvMsDuration>(), Err(ParseEnvMsDurationError));
        assert_eq!(
            "1500".parse::<EnvMsDuration>(),
            Ok(EnvMsDuration(Duration::from_millis(1500)))
        );
    }
}
