use std::fmt;

/// Stand-in for secret words wherever a command is shown rather than run.
pub const MASK: &str = "********";

/// A POSIX shell command line built from quoted argument vectors.
///
/// Steps are chained with `&&`, so the first failing step ends the command
/// with its status. Rendering quotes every word, so values from the module
/// definitions never reach the shell unescaped.
///
/// [`ShellCommand::render`] produces the script that runs. `Display` and
/// `Debug` show the same script with secret words masked, and are what logs
/// and error messages use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Exec {
        env: Vec<(String, String)>,
        argv: Vec<Word>,
    },
    /// Already-rendered shell text. Only built from quoted parts.
    Script(String),
}

#[derive(Clone, PartialEq, Eq)]
struct Word {
    text: String,
    secret: bool,
}

impl Word {
    fn shown(&self, reveal: bool) -> String {
        if self.secret && !reveal {
            MASK.to_string()
        } else {
            quote(&self.text)
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", if self.secret { MASK } else { &self.text })
    }
}

fn to_argv<I, S>(argv: I) -> Vec<Word>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    argv.into_iter()
        .map(|text| Word {
            text: text.into(),
            secret: false,
        })
        .collect()
}

impl ShellCommand {
    /// A command consisting of a single program invocation.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: vec![Step::Exec {
                env: Vec::new(),
                argv: to_argv(argv),
            }],
        }
    }

    /// A command from shell text. Callers quote interpolated values with
    /// [`quote`].
    pub fn script(text: impl Into<String>) -> Self {
        Self {
            steps: vec![Step::Script(text.into())],
        }
    }

    /// Chain another invocation that runs only if everything before succeeded.
    pub fn and<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(Step::Exec {
            env: Vec::new(),
            argv: to_argv(argv),
        });
        self
    }

    /// Chain another command.
    pub fn and_then(mut self, other: ShellCommand) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// Append arguments to the most recent invocation.
    pub fn args<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_words(to_argv(argv));
        self
    }

    /// Append an argument that is passed to the program but never shown.
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.push_words(vec![Word {
            text: value.into(),
            secret: true,
        }]);
        self
    }

    fn push_words(&mut self, words: Vec<Word>) {
        match self.steps.last_mut() {
            Some(Step::Exec { argv, .. }) => argv.extend(words),
            _ => self.steps.push(Step::Exec {
                env: Vec::new(),
                argv: words,
            }),
        }
    }

    /// Set an environment variable for the most recently added invocation.
    ///
    /// `key` must be a valid shell identifier; anything else is ignored.
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        let valid_key = key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key {
            log::warn!("ignoring invalid environment variable name {:?}", key);
            return self;
        }
        if let Some(Step::Exec { env, .. }) = self.steps.last_mut() {
            env.push((key.to_string(), value.into()));
        }
        self
    }

    /// Render the command as a single line of POSIX shell, secrets included.
    ///
    /// Only for handing to a shell; use `Display` for anything a person reads.
    pub fn render(&self) -> String {
        self.render_with(true)
    }

    fn render_with(&self, reveal: bool) -> String {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Exec { env, argv } => env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, quote(v)))
                    .chain(argv.iter().map(|word| word.shown(reveal)))
                    .collect::<Vec<_>>()
                    .join(" "),
                Step::Script(text) => text.clone(),
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_with(false))
    }
}

/// Quote a single word for POSIX shell.
pub fn quote(word: &str) -> String {
    shell_words::quote(word).into_owned()
}
