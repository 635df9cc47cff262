//! Hand-rolled argument parsing for both binaries.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_AGENT_CONFIG: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCliOptions {
    pub config: PathBuf,
    pub help: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCliOptions {
    pub scenario: Option<PathBuf>,
    pub preset: Option<String>,
    pub seed: Option<u64>,
    pub max_ticks: Option<u64>,
    pub help: bool,
}

pub fn parse_agent_args() -> Result<AgentCliOptions, String> {
    parse_agent_args_from(env::args().skip(1).collect())
}

pub fn parse_sim_args() -> Result<SimCliOptions, String> {
    parse_sim_args_from(env::args().skip(1).collect())
}

fn parse_agent_args_from(args: Vec<String>) -> Result<AgentCliOptions, String> {
    let mut i = 0usize;
    let mut config = None;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --config (expected a JSON or TOML file path)",
                )?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--help" | "-h" => {
                return Ok(AgentCliOptions {
                    config: PathBuf::from(DEFAULT_AGENT_CONFIG),
                    help: true,
                });
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(AgentCliOptions {
        config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_AGENT_CONFIG)),
        help: false,
    })
}

fn parse_sim_args_from(args: Vec<String>) -> Result<SimCliOptions, String> {
    let mut i = 0usize;
    let mut opts = SimCliOptions {
        scenario: None,
        preset: None,
        seed: None,
        max_ticks: None,
        help: false,
    };

    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --scenario (expected a TOML file path)",
                )?;
                if opts.scenario.replace(PathBuf::from(path)).is_some() {
                    return Err("--scenario provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name = args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if opts.preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--seed" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --seed (expected a u64)")?;
                let seed = raw
                    .parse()
                    .map_err(|_| format!("invalid --seed \"{raw}\" (expected a u64)"))?;
                opts.seed = Some(seed);
            }
            "--ticks" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --ticks (expected a u64)")?;
                let ticks = raw
                    .parse()
                    .map_err(|_| format!("invalid --ticks \"{raw}\" (expected a u64)"))?;
                opts.max_ticks = Some(ticks);
            }
            "--help" | "-h" => {
                opts.help = true;
                return Ok(opts);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if opts.scenario.is_some() && opts.preset.is_some() {
        return Err(
            "arguments `--scenario` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    if opts.scenario.is_none() && opts.preset.is_none() {
        opts.preset = Some("baseline".to_string());
    }

    Ok(opts)
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_agent_usage() {
    eprintln!("der-agent: single DER device agent over MQTT");
    eprintln!();
    eprintln!("Usage: der-agent [--config <path>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>   Agent config, JSON or .toml (default: {DEFAULT_AGENT_CONFIG})");
    eprintln!("  --help            Show this help message");
}

pub fn print_sim_usage() {
    eprintln!("der-sim: multi-device DER fleet simulator over MQTT");
    eprintln!();
    eprintln!("Usage: der-sim [--scenario <path> | --preset <name>] [--seed <u64>] [--ticks <u64>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>   Load the fleet from a TOML file");
    eprintln!("  --preset <name>     Use a built-in fleet (baseline, solar_home)");
    eprintln!("  --seed <u64>        Override the random seed");
    eprintln!("  --ticks <u64>       Stop after this many ticks");
    eprintln!("  --help              Show this help message");
    eprintln!();
    eprintln!("BROKER_HOST and BROKER_PORT override the broker address.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn agent_defaults_to_config_json() {
        let opts = parse_agent_args_from(Vec::new()).expect("parse should succeed");
        assert_eq!(opts.config, PathBuf::from("config.json"));
        assert!(!opts.help);
    }

    #[test]
    fn agent_accepts_config_path() {
        let opts = parse_agent_args_from(args(&["--config", "/etc/der/agent.toml"]))
            .expect("parse should succeed");
        assert_eq!(opts.config, PathBuf::from("/etc/der/agent.toml"));
    }

    #[test]
    fn agent_rejects_unknown_and_missing_values() {
        assert!(parse_agent_args_from(args(&["--config"])).is_err());
        assert!(parse_agent_args_from(args(&["--verbose"])).is_err());
        assert!(parse_agent_args_from(args(&["--config", "a", "--config", "b"])).is_err());
    }

    #[test]
    fn supports_scenario_cli() {
        let opts = parse_sim_args_from(args(&["--scenario", "fleet.toml"]))
            .expect("parse should succeed");
        assert_eq!(
            opts.scenario.as_deref().and_then(|p| p.to_str()),
            Some("fleet.toml")
        );
        assert!(opts.preset.is_none());
    }

    #[test]
    fn sim_defaults_to_baseline_preset() {
        let opts = parse_sim_args_from(Vec::new()).expect("parse should succeed");
        assert_eq!(opts.preset.as_deref(), Some("baseline"));
    }

    #[test]
    fn sim_parses_seed_and_ticks() {
        let opts = parse_sim_args_from(args(&["--preset", "solar_home", "--seed", "7", "--ticks", "10"]))
            .expect("parse should succeed");
        assert_eq!(opts.preset.as_deref(), Some("solar_home"));
        assert_eq!(opts.seed, Some(7));
        assert_eq!(opts.max_ticks, Some(10));
        assert!(parse_sim_args_from(args(&["--seed", "-1"])).is_err());
    }

    #[test]
    fn scenario_and_preset_are_exclusive() {
        let err = parse_sim_args_from(args(&["--scenario", "a.toml", "--preset", "baseline"]))
            .unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn help_flag_short_circuits() {
        assert!(parse_sim_args_from(args(&["--help"])).unwrap().help);
        assert!(parse_agent_args_from(args(&["-h"])).unwrap().help);
    }
}
