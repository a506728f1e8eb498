use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use shell_escape::unix::escape;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Environment variable telling a staged script where to write its result file.
pub const RESULT_ENV: &str = "SYSBOT_RESULT";

/// Reads exactly one line (the password) off stdin and caches sudo credentials
/// with it, leaving the rest of stdin for the elevated command.
const SUDO_VALIDATE: &str =
    "IFS= read -r sysbot_pw; printf '%s\\n' \"$sysbot_pw\" | sudo -S -p '' -v";

/// Remote shell the command text is written for.
///
/// Commands are shipped encoded so the user's text never needs to be quoted
/// for the remote login shell: base64 for bash, UTF-16LE base64 for
/// PowerShell's `-EncodedCommand`, and stdin for python.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    #[default]
    Bash,
    Powershell,
    Python,
}

/// Account a `runas` request elevates with, when the session knows a password.
#[derive(Clone, PartialEq, Eq)]
pub struct Elevation {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Elevation")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// A command line plus whatever must be written to the channel's stdin.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    fn plain(command: String) -> Self {
        Self {
            command,
            stdin: None,
        }
    }

    fn with_stdin(command: String, stdin: String) -> Self {
        Self {
            command,
            stdin: Some(stdin.into_bytes()),
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.command)
            .field("stdin", &self.stdin.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Shell {
    pub fn script_extension(&self) -> &'static str {
        match self {
            Shell::Bash => "sh",
            Shell::Powershell => "ps1",
            Shell::Python => "py",
        }
    }

    pub fn inline(&self, command: &str, runas: bool, elevation: Option<&Elevation>) -> Invocation {
        match self {
            Shell::Bash => {
                let pipeline = format!("echo {} | base64 -d | bash", STANDARD.encode(command));
                if runas {
                    sudo(&format!("bash -c '{}'", pipeline), elevation, None)
                } else {
                    Invocation::plain(pipeline)
                }
            }
            Shell::Powershell => powershell(command, runas, elevation),
            Shell::Python => {
                if runas {
                    sudo("python3 -", elevation, Some(command))
                } else {
                    Invocation::with_stdin("python3 -".to_string(), command.to_string())
                }
            }
        }
    }

    /// Runs the staged script at `path`, exporting `result_path` as [`RESULT_ENV`].
    pub fn script(
        &self,
        path: &str,
        result_path: &str,
        runas: bool,
        elevation: Option<&Elevation>,
    ) -> Invocation {
        let result_env = format!("{}={}", RESULT_ENV, escape(Cow::Borrowed(result_path)));
        let call = match self {
            Shell::Bash => format!(
                "{} {}",
                result_env,
                escape(Cow::Owned(executable_path(path, '/')))
            ),
            Shell::Python => format!("{} python3 {}", result_env, escape(Cow::Borrowed(path))),
            Shell::Powershell => {
                let inner = format!(
                    "$env:{} = {}; & {}",
                    RESULT_ENV,
                    ps_quote(result_path),
                    ps_quote(&executable_path(path, '\\'))
                );
                return powershell(&inner, runas, elevation);
            }
        };
        if runas {
            sudo(&format!("env {}", call), elevation, None)
        } else {
            Invocation::plain(call)
        }
    }
}

impl FromStr for Shell {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bash" | "sh" | "linux" => Ok(Shell::Bash),
            "powershell" | "pwsh" | "windows" => Ok(Shell::Powershell),
            "python" | "python3" => Ok(Shell::Python),
            other => Err(crate::Error::ConfigError(format!("unknown shell '{}'", other))),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shell::Bash => f.write_str("bash"),
            Shell::Powershell => f.write_str("powershell"),
            Shell::Python => f.write_str("python"),
        }
    }
}

/// Wraps `command` in sudo. `body` is what the command itself reads from stdin.
fn sudo(command: &str, elevation: Option<&Elevation>, body: Option<&str>) -> Invocation {
    match elevation {
        Some(elevation) => {
            let mut stdin = format!("{}\n", elevation.password);
            stdin.push_str(body.unwrap_or_default());
            Invocation::with_stdin(format!("{} && sudo -n {}", SUDO_VALIDATE, command), stdin)
        }
        // -n: fail instead of waiting for a password nobody will type
        None => {
            let command = format!("sudo -n {}", command);
            match body {
                Some(body) => Invocation::with_stdin(command, body.to_string()),
                None => Invocation::plain(command),
            }
        }
    }
}

/// Relative paths need an explicit `./` to be run as a program.
fn executable_path(path: &str, sep: char) -> String {
    let absolute = path.starts_with('/')
        || path.starts_with('\\')
        || path.as_bytes().get(1) == Some(&b':');
    let dotted = path.starts_with("./") || path.starts_with(".\\");
    if absolute || dotted {
        path.to_string()
    } else {
        format!(".{}{}", sep, path)
    }
}

/// `runas` goes through a credential when the password is known, UAC otherwise.
fn powershell(script: &str, runas: bool, elevation: Option<&Elevation>) -> Invocation {
    if !runas {
        return Invocation::plain(powershell_encoded(script));
    }
    let arguments = format!(
        "'-NoProfile','-NonInteractive','-EncodedCommand','{}'",
        utf16_base64(script)
    );
    match elevation {
        Some(elevation) => {
            let wrapper = format!(
                "$securePassword = ConvertTo-SecureString ([Console]::In.ReadLine()) -AsPlainText -Force; \
                 $credential = New-Object System.Management.Automation.PSCredential({}, $securePassword); \
                 Start-Process PowerShell -Credential $credential -Wait -NoNewWindow -ArgumentList {}",
                ps_quote(&elevation.login),
                arguments
            );
            Invocation::with_stdin(
                powershell_encoded(&wrapper),
                format!("{}\n", elevation.password),
            )
        }
        None => Invocation::plain(powershell_encoded(&format!(
            "Start-Process PowerShell -Verb RunAs -Wait -ArgumentList {}",
            arguments
        ))),
    }
}

fn powershell_encoded(script: &str) -> String {
    format!(
        "powershell.exe -NoProfile -NonInteractive -ExecutionPolicy Bypass -EncodedCommand {}",
        utf16_base64(script)
    )
}

fn utf16_base64(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
