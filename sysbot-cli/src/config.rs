use anyhow::{bail, Context};
use clap::ArgMatches;
use std::path::PathBuf;
use std::time::Duration;
use sysbot::{
    default_port, Credentials, JumpHostConfig, Shell, SysbotConfig, Target, TryIntoTarget,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Exec {
        command: Option<String>,
        script: Option<PathBuf>,
        script_path: Option<String>,
        runas: bool,
        fetch_result: bool,
        json: bool,
    },
    Push {
        local: PathBuf,
        remote: Option<String>,
    },
    Read {
        remote: Option<String>,
    },
    Delete {
        remote: String,
        ignore_missing: bool,
    },
}

#[derive(Debug)]
pub struct Config {
    pub target: Target,
    pub credentials: Credentials,
    pub shell: Shell,
    /// `--jump` hops, tried after any from the config file.
    pub jumps: Vec<JumpHostConfig>,
    pub config_file: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub verbosity: u8,
    pub action: Action,
}

impl Config {
    /// The JSON config file, if any, with command line overrides applied.
    pub async fn settings(&self) -> anyhow::Result<SysbotConfig> {
        let mut settings = match &self.config_file {
            Some(path) => SysbotConfig::load(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?,
            None => SysbotConfig::default(),
        };
        if let Some(timeout) = self.timeout {
            settings.collect_timeout_ms = Some(timeout.as_millis() as u64);
        }
        if !self.jumps.is_empty() {
            settings
                .jump_hosts
                .get_or_insert_with(Vec::new)
                .extend(self.jumps.iter().cloned());
        }
        Ok(settings)
    }
}

/// `[login@]host[:port]`; jump hosts given on the command line use keys.
fn parse_jump(spec: &str) -> anyhow::Result<JumpHostConfig> {
    let (login, host) = match spec.split_once('@') {
        Some((login, host)) => (Some(login.to_string()), host),
        None => (None, spec),
    };
    if host.is_empty() || login.as_deref() == Some("") {
        bail!("invalid jump host '{}'", spec);
    }
    Ok(JumpHostConfig {
        host: host.to_string(),
        port: None,
        login,
        password: None,
    })
}

impl TryFrom<&ArgMatches> for Config {
    type Error = anyhow::Error;

    fn try_from(matches: &ArgMatches) -> anyhow::Result<Self> {
        let host = matches
            .get_one::<String>("host")
            .context("--host is required")?;
        let port = match matches.get_one::<u16>("port") {
            Some(port) => *port,
            None => default_port("ssh").unwrap_or(22),
        };
        let target = host.as_str().try_into_target(port)?;

        let credentials = Credentials::from_parts(
            matches.get_one::<String>("login").cloned(),
            matches.get_one::<String>("password").cloned(),
        );

        let shell = match matches.get_one::<String>("shell") {
            Some(name) => name.parse::<Shell>()?,
            None => Shell::default(),
        };

        let jumps = matches
            .get_many::<String>("jump")
            .into_iter()
            .flatten()
            .map(|spec| parse_jump(spec))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let action = match matches.subcommand() {
            Some(("exec", sub)) => {
                let command = sub.get_one::<String>("command").cloned();
                let script = sub.get_one::<PathBuf>("script").cloned();
                if command.is_none() && script.is_none() {
                    bail!("exec needs a COMMAND or --script FILE");
                }
                Action::Exec {
                    command,
                    script,
                    script_path: sub.get_one::<String>("script-path").cloned(),
                    runas: sub.get_flag("runas"),
                    fetch_result: sub.get_flag("fetch-result"),
                    json: sub.get_flag("json"),
                }
            }
            Some(("push", sub)) => Action::Push {
                local: sub
                    .get_one::<PathBuf>("local")
                    .cloned()
                    .context("push needs a LOCAL file")?,
                remote: sub.get_one::<String>("remote").cloned(),
            },
            Some(("read", sub)) => Action::Read {
                remote: sub.get_one::<String>("remote").cloned(),
            },
            Some(("delete", sub)) => Action::Delete {
                remote: sub
                    .get_one::<String>("remote")
                    .cloned()
                    .context("delete needs a REMOTE path")?,
                ignore_missing: sub.get_flag("ignore-missing"),
            },
            Some((other, _)) => bail!("unknown subcommand {}", other),
            None => bail!("no subcommand given"),
        };

        Ok(Self {
            target,
            credentials,
            shell,
            jumps,
            config_file: matches.get_one::<PathBuf>("config").cloned(),
            timeout: matches
                .get_one::<u64>("timeout")
                .map(|secs| Duration::from_secs(*secs)),
            verbosity: matches.get_count("verbose"),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli;

    fn parse(args: &[&str]) -> anyhow::Result<Config> {
        let matches = cli().try_get_matches_from(args)?;
        Config::try_from(&matches)
    }

    #[test]
    fn exec_with_defaults() {
        let config = parse(&["sysbot", "--host", "web01", "--login", "ops", "exec", "uptime"]).unwrap();
        assert_eq!(config.target, Target::new("web01", 22).unwrap());
        assert_eq!(config.credentials, Credentials::LoginOnly("ops".into()));
        assert_eq!(config.shell, Shell::Bash);
        assert_eq!(config.verbosity, 0);
        assert!(matches!(
            config.action,
            Action::Exec { ref command, runas: false, json: false, .. } if command.as_deref() == Some("uptime")
        ));
    }

    #[test]
    fn host_port_overrides_flag() {
        let config = parse(&["sysbot", "--host", "10.0.0.5:2222", "--port", "23", "read", "a.txt"]).unwrap();
        assert_eq!(config.target.port(), 2222);
        let config = parse(&["sysbot", "--host", "10.0.0.5", "--port", "2200", "read"]).unwrap();
        assert_eq!(config.target.port(), 2200);
        assert_eq!(config.action, Action::Read { remote: None });
    }

    #[test]
    fn script_exec_with_flags() {
        let config = parse(&[
            "sysbot", "--host", "win01", "--shell", "powershell", "-vv", "--timeout", "30",
            "exec", "--script", "job.ps1", "--runas", "--fetch-result",
        ])
        .unwrap();
        assert_eq!(config.shell, Shell::Powershell);
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.action,
            Action::Exec {
                command: None,
                script: Some(PathBuf::from("job.ps1")),
                script_path: None,
                runas: true,
                fetch_result: true,
                json: false,
            }
        );
    }

    #[test]
    fn exec_needs_something_to_run() {
        assert!(parse(&["sysbot", "--host", "web01", "exec"]).is_err());
    }

    #[test]
    fn unknown_shell_is_rejected() {
        assert!(parse(&["sysbot", "--host", "web01", "--shell", "cmd", "read"]).is_err());
    }

    #[test]
    fn delete_ignore_missing() {
        let config = parse(&["sysbot", "--host", "web01", "delete", ".sysbot/x.sh", "--ignore-missing"]).unwrap();
        assert_eq!(
            config.action,
            Action::Delete {
                remote: ".sysbot/x.sh".into(),
                ignore_missing: true,
            }
        );
    }

    #[test]
    fn python_shell_is_accepted() {
        let config = parse(&["sysbot", "--host", "web01", "--shell", "python3", "exec", "print(1)"]).unwrap();
        assert_eq!(config.shell, Shell::Python);
    }

    #[tokio::test]
    async fn jump_flags_become_jump_hosts_in_order() {
        let config = parse(&[
            "sysbot", "--host", "10.2.0.9", "-J", "ops@bastion:2222", "--jump", "inner", "read",
        ])
        .unwrap();
        let settings = config.settings().await.unwrap();
        let hops = settings.jump_hosts.unwrap();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].host, "bastion:2222");
        assert_eq!(hops[0].login.as_deref(), Some("ops"));
        assert_eq!(hops[1].host, "inner");
        assert_eq!(hops[1].login, None);
        assert!(parse(&["sysbot", "--host", "x", "-J", "ops@", "read"]).is_err());
    }

    #[tokio::test]
    async fn timeout_flag_overrides_collector_timeout() {
        let config = parse(&["sysbot", "--host", "web01", "--timeout", "12", "read"]).unwrap();
        let settings = config.settings().await.unwrap();
        assert_eq!(settings.collect_timeout_ms, Some(12_000));
    }
}
