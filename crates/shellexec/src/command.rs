//! Structured shell command construction
//!
//! Commands are assembled from words. The program name and every argument are
//! quoted on the way in, so paths, user names and option values can never be
//! reinterpreted by the remote shell. Only the operators added through the
//! combinators (`&&`, `||`, `;`, `|`, redirections) are emitted verbatim.

use std::borrow::Cow;
use std::fmt;

/// Quote a value for a POSIX shell.
///
/// Values made only of characters that the shell never treats specially are
/// returned unchanged. Everything else is wrapped in single quotes, with
/// embedded single quotes rendered as `'\''`.
///
/// Note that a quoted `~` is not expanded; pass absolute paths.
pub fn quote(value: &str) -> Cow<'_, str> {
    if value.is_empty() {
        return Cow::Borrowed("''");
    }

    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        return Cow::Borrowed(value);
    }

    Cow::Owned(format!("'{}'", value.replace('\'', r"'\''")))
}

/// A shell command line built from quoted words.
///
/// ```
/// use shellexec::ShellCommand;
///
/// let cmd = ShellCommand::new("chmod")
///     .arg("--")
///     .arg("644")
///     .arg("/srv/my app/config.toml");
/// assert_eq!(cmd.render(), "chmod -- 644 '/srv/my app/config.toml'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    words: Vec<String>,
}

impl ShellCommand {
    /// Start a command with the given program
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            words: vec![quote(program.as_ref()).into_owned()],
        }
    }

    /// `exit <code>`, used to signal outcomes from composed scripts
    pub fn exit(code: i32) -> Self {
        Self {
            words: vec!["exit".to_string(), code.to_string()],
        }
    }

    /// `if <condition>; then <then>; else <otherwise>; fi`
    ///
    /// Unlike `condition.and(then).or(otherwise)`, a failing `then` never
    /// runs `otherwise`.
    pub fn branch(condition: Self, then: Self, otherwise: Self) -> Self {
        let mut words = vec!["if".to_string()];
        words.extend(condition.words);
        words.extend([";".to_string(), "then".to_string()]);
        words.extend(then.words);
        words.extend([";".to_string(), "else".to_string()]);
        words.extend(otherwise.words);
        words.extend([";".to_string(), "fi".to_string()]);
        Self { words }
    }

    /// Append one quoted argument
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.words.push(quote(arg.as_ref()).into_owned());
        self
    }

    /// Append several quoted arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.words.push(quote(arg.as_ref()).into_owned());
        }
        self
    }

    /// Run `next` only if this command succeeds
    pub fn and(self, next: Self) -> Self {
        self.join("&&", next)
    }

    /// Run `next` only if this command fails
    pub fn or(self, next: Self) -> Self {
        self.join("||", next)
    }

    /// Run `next` after this command regardless of its status
    pub fn then(self, next: Self) -> Self {
        self.join(";", next)
    }

    /// Pipe stdout of this command into `next`
    pub fn pipe(self, next: Self) -> Self {
        self.join("|", next)
    }

    /// Discard stderr of the last command
    pub fn stderr_null(mut self) -> Self {
        self.words.push("2>/dev/null".to_string());
        self
    }

    /// Redirect stdout of the last command into `path`, truncating it
    pub fn write_to(mut self, path: impl AsRef<str>) -> Self {
        self.words.push(">".to_string());
        self.words.push(quote(path.as_ref()).into_owned());
        self
    }

    /// Discard stdout of the last command
    pub fn stdout_null(mut self) -> Self {
        self.words.push(">/dev/null".to_string());
        self
    }

    fn join(mut self, operator: &str, next: Self) -> Self {
        self.words.push(operator.to_string());
        self.words.extend(next.words);
        self
    }

    /// Render the command line
    pub fn render(&self) -> String {
        self.words.join(" ")
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_values_untouched() {
        assert_eq!(quote("/etc/motd"), "/etc/motd");
        assert_eq!(quote("www-data:www-data"), "www-data:www-data");
        assert_eq!(quote("0644"), "0644");
    }

    #[test]
    fn test_quote_special_values() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("my file"), "'my file'");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("a;b"), "'a;b'");
    }

    #[test]
    fn test_builder_quotes_every_argument() {
        let cmd = ShellCommand::new("touch").arg("--").arg("/tmp/x; rm -rf /");
        assert_eq!(cmd.render(), "touch -- '/tmp/x; rm -rf /'");
    }

    #[test]
    fn test_combinators() {
        let cmd = ShellCommand::new("test")
            .args(["-e", "/a"])
            .or(ShellCommand::exit(3))
            .then(ShellCommand::new("cat").arg("/a"));
        assert_eq!(cmd.to_string(), "test -e /a || exit 3 ; cat /a");

        let piped = ShellCommand::new("crontab")
            .arg("-l")
            .stderr_null()
            .pipe(ShellCommand::new("wc").arg("-l"));
        assert_eq!(piped.render(), "crontab -l 2>/dev/null | wc -l");

        let branch = ShellCommand::branch(
            ShellCommand::new("test").args(["-d", "/srv"]),
            ShellCommand::exit(0),
            ShellCommand::exit(3),
        );
        assert_eq!(
            branch.render(),
            "if test -d /srv ; then exit 0 ; else exit 3 ; fi"
        );

        let write = ShellCommand::new("cat").write_to("/etc/cron.d/my job");
        assert_eq!(write.render(), "cat > '/etc/cron.d/my job'");
    }
}
