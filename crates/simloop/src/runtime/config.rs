use simloop_core::{ConfigError, LoopConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub timestep_s: f64,
    pub rate_multiplier: f64,
    pub publish_interval_ms: u64,
    pub rate_time_constant_s: f64,
    pub run_seconds: Option<u64>,
    pub arm_bind: String,
    pub gripper_bind: String,
    pub bridge_enabled: bool,
    pub bridge_require_handshake: bool,
    pub keyboard_enabled: bool,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            timestep_s: 0.001,
            rate_multiplier: 1.0,
            publish_interval_ms: 33,
            rate_time_constant_s: 0.1,
            run_seconds: None,
            arm_bind: "127.0.0.1:7000".to_string(),
            gripper_bind: "127.0.0.1:7001".to_string(),
            bridge_enabled: true,
            bridge_require_handshake: false,
            keyboard_enabled: true,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--timestep" => {
                    if i + 1 < args.len() {
                        cfg.timestep_s = args[i + 1].parse().unwrap_or(cfg.timestep_s);
                        i += 1;
                    }
                }
                "--rate" => {
                    if i + 1 < args.len() {
                        cfg.rate_multiplier = args[i + 1].parse().unwrap_or(cfg.rate_multiplier);
                        i += 1;
                    }
                }
                "--publish-interval-ms" => {
                    if i + 1 < args.len() {
                        cfg.publish_interval_ms =
                            args[i + 1].parse().unwrap_or(cfg.publish_interval_ms);
                        i += 1;
                    }
                }
                "--rate-time-constant" => {
                    if i + 1 < args.len() {
                        cfg.rate_time_constant_s =
                            args[i + 1].parse().unwrap_or(cfg.rate_time_constant_s);
                        i += 1;
                    }
                }
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--arm-bind" => {
                    if i + 1 < args.len() {
                        cfg.arm_bind = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--gripper-bind" => {
                    if i + 1 < args.len() {
                        cfg.gripper_bind = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--no-bridge" => {
                    cfg.bridge_enabled = false;
                }
                "--require-handshake" => {
                    cfg.bridge_require_handshake = true;
                }
                "--no-keyboard" => {
                    cfg.keyboard_enabled = false;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    if i + 1 < args.len() {
                        cfg.log_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--audit-log" => {
                    if i + 1 < args.len() {
                        cfg.audit_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    /// Loop settings derived from the flat numeric options.
    pub fn loop_config(&self) -> Result<LoopConfig, ConfigError> {
        let timestep = Duration::try_from_secs_f64(self.timestep_s)
            .map_err(|_| ConfigError::NonPositiveTimestep)?;
        let rate_time_constant = Duration::try_from_secs_f64(self.rate_time_constant_s)
            .map_err(|_| ConfigError::InvalidRateTimeConstant(self.rate_time_constant_s))?;
        let config = LoopConfig {
            timestep,
            rate_multiplier: self.rate_multiplier,
            publish_interval: Duration::from_millis(self.publish_interval_ms),
            rate_time_constant,
            ..LoopConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn print_help() {
        println!(
            r#"simloop - command-driven robot simulation loop

USAGE:
    simloop [OPTIONS]

OPTIONS:
    --timestep <SECS>           Simulated time per step [default: 0.001]
    --rate <MULT>               Target simulated seconds per wall second, at least 1e-6; inf runs unthrottled [default: 1.0]
    --publish-interval-ms <MS>  Simulated time between status publications [default: 33]
    --rate-time-constant <SECS> Smoothing time constant of the rate estimate [default: 0.1]
    --arm-bind <ADDR>           Arm command channel bind address [default: 127.0.0.1:7000]
    --gripper-bind <ADDR>       Gripper command channel bind address [default: 127.0.0.1:7001]
    --no-bridge                 Disable both command channels (standalone simulation)
    --require-handshake         Require a hello message before accepting commands
    --no-keyboard               Do not read q/r control keys from stdin
    --run-seconds <SECS>        Run for a fixed duration then exit
    --json-logs                 Output logs in JSON format (for log aggregation)
    --log-dir <PATH>            Also write JSON logs to a daily rolling file in this directory
    --metrics-addr <ADDR>       Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>          Enable audit logging to specified JSONL file
    -h, --help                  Print this help message

KEYS (stdin, one per line):
    r, restart                  Restart the simulation from its initial state
    q, quit                     Stop and exit

ENVIRONMENT VARIABLES:
    RUST_LOG                    Set log filter (e.g., RUST_LOG=debug,simloop_core=trace)

EXAMPLES:
    # Real-time run with metrics
    simloop --metrics-addr 0.0.0.0:9090

    # Twice real time, unattended, with an audit trail
    simloop --rate 2 --no-keyboard --audit-log /var/log/simloop/audit.jsonl

    # Short headless test run
    simloop --run-seconds 10 --no-bridge --no-keyboard
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("simloop")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_match_loop_defaults() {
        let cfg = RuntimeConfig::from_args(&args(&[]));
        let loop_cfg = cfg.loop_config().unwrap();
        let defaults = LoopConfig::default();
        assert_eq!(loop_cfg.timestep, defaults.timestep);
        assert_eq!(loop_cfg.publish_interval, defaults.publish_interval);
        assert_eq!(loop_cfg.rate_time_constant, defaults.rate_time_constant);
        assert_eq!(loop_cfg.rate_multiplier, 1.0);
        assert!(cfg.bridge_enabled);
        assert!(cfg.keyboard_enabled);
    }

    #[test]
    fn parses_loop_and_runtime_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--timestep",
            "0.002",
            "--rate",
            "inf",
            "--publish-interval-ms",
            "50",
            "--arm-bind",
            "127.0.0.1:17000",
            "--no-keyboard",
            "--run-seconds",
            "3",
            "--log-dir",
            "/tmp/simloop-logs",
        ]));
        assert_eq!(cfg.arm_bind, "127.0.0.1:17000");
        assert_eq!(cfg.gripper_bind, "127.0.0.1:7001");
        assert!(!cfg.keyboard_enabled);
        assert_eq!(cfg.run_seconds, Some(3));
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/tmp/simloop-logs")));

        let loop_cfg = cfg.loop_config().unwrap();
        assert_eq!(loop_cfg.timestep, Duration::from_millis(2));
        assert!(loop_cfg.rate_multiplier.is_infinite());
        assert_eq!(loop_cfg.publish_interval, Duration::from_millis(50));
    }

    #[test]
    fn invalid_loop_values_are_reported() {
        let cfg = RuntimeConfig::from_args(&args(&["--timestep", "-1"]));
        assert_eq!(cfg.loop_config().unwrap_err(), ConfigError::NonPositiveTimestep);

        let cfg = RuntimeConfig::from_args(&args(&["--timestep", "0"]));
        assert_eq!(cfg.loop_config().unwrap_err(), ConfigError::NonPositiveTimestep);

        let cfg = RuntimeConfig::from_args(&args(&["--rate", "0"]));
        assert_eq!(
            cfg.loop_config().unwrap_err(),
            ConfigError::InvalidRateMultiplier(0.0)
        );

        let cfg = RuntimeConfig::from_args(&args(&["--rate-time-constant", "-0.5"]));
        assert_eq!(
            cfg.loop_config().unwrap_err(),
            ConfigError::InvalidRateTimeConstant(-0.5)
        );

        let cfg = RuntimeConfig::from_args(&args(&["--rate-time-constant", "NaN"]));
        assert!(matches!(
            cfg.loop_config(),
            Err(ConfigError::InvalidRateTimeConstant(v)) if v.is_nan()
        ));

        let cfg = RuntimeConfig::from_args(&args(&["--rate-time-constant", "0"]));
        assert_eq!(cfg.loop_config().unwrap().rate_time_constant, Duration::ZERO);
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--no-bridge"]));
        assert!(cfg.show_help);
        assert!(cfg.bridge_enabled);
    }
}
