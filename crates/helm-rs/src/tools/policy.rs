//! Shell command danger policy.
//!
//! Two fixed lists, applied to every command regardless of mode:
//! - deny patterns (regexes over the command line) for invocations that are
//!   never run, such as wiping the root filesystem;
//! - confirm-required programs, matched against the program of every
//!   pipeline/list segment, such as recursive delete or privilege escalation.
//!
//! Segments are split into words the way a shell would (quotes and
//! backslashes removed), so `"rm"` and `\rm` are still `rm`. The program is
//! looked for past shell keywords, assignments and wrappers like `env` or
//! `xargs`. Payloads handed to `sh -c`, `eval` and `find -exec` are
//! classified like a command line of their own.

use regex::Regex;

use super::core::Danger;

/// Programs that always need an explicit user confirmation.
pub const CONFIRM_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "sudo", "su", "doas", "chmod", "chown", "dd", "mkfs", "kill", "pkill",
    "killall", "shutdown", "reboot", "halt", "format", "fdisk", "parted", "mount", "umount",
];

/// Command lines that are refused outright.
pub const DENY_PATTERNS: &[&str] = &[
    // rm -rf / and rm -rf /*
    r"\brm\s+(-\S+\s+)*(--no-preserve-root\s+)?/\*?(\s|$|;|&|\|)",
    // mkfs on a block device
    r"\bmkfs(\.\w+)?\s+(\S+\s+)*/dev/",
    // redirecting into a raw disk
    r">\s*/dev/(sd|hd|nvme|disk|mmcblk)",
    r"\bdd\b.*\bof=/dev/(sd|hd|nvme|disk|mmcblk)",
    // fork bomb
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
];

/// Wrappers whose first non-option argument is the program actually run.
const PASSTHROUGH: &[&str] = &[
    "env", "nohup", "time", "nice", "exec", "command", "xargs", "timeout", "stdbuf", "ionice",
];

/// Shells whose `-c` argument is a command line.
const INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "ash", "fish"];

/// Words that can precede the program of a segment.
const KEYWORDS: &[&str] = &["if", "then", "else", "elif", "do", "while", "until", "!", "{", "}"];

/// `find` actions that run a program for each match.
const FIND_EXEC: &[&str] = &["-exec", "-execdir", "-ok", "-okdir"];

/// Programs that only read, as long as their output is not redirected.
pub const READ_ONLY_PROGRAMS: &[&str] = &[
    "ls", "cat", "head", "tail", "wc", "pwd", "echo", "grep", "rg", "tree", "file", "stat",
    "du", "df", "which", "diff", "cut", "date", "whoami", "uname", "find",
];

/// `git` subcommands that only read.
const READ_ONLY_GIT: &[&str] = &[
    "status", "log", "diff", "show", "blame", "ls-files", "rev-parse", "grep", "shortlog",
];

/// `find` primaries that act on matches.
const FIND_ACTIONS: &[&str] = &["-delete", "-fprint", "-fprint0", "-fprintf", "-fls"];

/// Payloads nested deeper than this are not inspected and need confirmation.
const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    confirm_programs: Vec<String>,
    deny: Vec<Regex>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            confirm_programs: CONFIRM_PROGRAMS.iter().map(|s| (*s).to_string()).collect(),
            deny: DENY_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl CommandPolicy {
    /// Add a program to the confirm-required list.
    pub fn with_confirm_program(mut self, program: impl Into<String>) -> Self {
        self.confirm_programs.push(program.into());
        self
    }

    /// Add a deny pattern.
    pub fn with_deny_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.deny.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Classify a full command line.
    pub fn classify(&self, command_line: &str) -> Danger {
        self.classify_line(command_line.trim(), 0)
    }

    /// Classify a program and its argument vector. No shell is involved, so
    /// the arguments are taken literally unless the program is itself a
    /// shell or a wrapper.
    pub fn classify_argv(&self, program: &str, args: &[String]) -> Danger {
        let mut line = shell_quote(program);
        for arg in args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        if let Some(denied) = self.denied(&line) {
            return denied;
        }
        let mut words = Vec::with_capacity(args.len() + 1);
        words.push(program.to_string());
        words.extend(args.iter().cloned());
        self.classify_words(&words, 0)
    }

    /// Whether a command line only reads: every segment runs a read-only
    /// program and nothing is redirected.
    pub fn is_read_only(&self, command_line: &str) -> bool {
        let segments = shell_segments(command_line);
        self.classify(command_line) == Danger::Safe
            && !command_line.contains('>')
            && !segments.is_empty()
            && segments.iter().all(|words| read_only_words(words))
    }

    pub fn is_read_only_argv(&self, program: &str, args: &[String]) -> bool {
        let mut words = Vec::with_capacity(args.len() + 1);
        words.push(program.to_string());
        words.extend(args.iter().cloned());
        self.classify_argv(program, args) == Danger::Safe && read_only_words(&words)
    }

    fn denied(&self, line: &str) -> Option<Danger> {
        self.deny.iter().find(|re| re.is_match(line)).map(|pattern| {
            Danger::Forbidden(format!("command matches deny pattern `{}`", pattern.as_str()))
        })
    }

    fn classify_line(&self, line: &str, depth: usize) -> Danger {
        if let Some(denied) = self.denied(line) {
            return denied;
        }
        let mut first_confirm = None;
        for segment in shell_segments(line) {
            match self.classify_words(&segment, depth) {
                Danger::Safe => {}
                forbidden @ Danger::Forbidden(_) => return forbidden,
                confirm => {
                    first_confirm.get_or_insert(confirm);
                }
            }
        }
        first_confirm.unwrap_or(Danger::Safe)
    }

    /// Classify one segment that has already been split into words.
    fn classify_words(&self, words: &[String], depth: usize) -> Danger {
        if depth > MAX_DEPTH {
            return Danger::ConfirmRequired("nested too deeply to inspect".into());
        }
        let start = words
            .iter()
            .position(|w| !KEYWORDS.contains(&w.as_str()) && !is_assignment(w));
        let Some(start) = start else {
            return Danger::Safe;
        };
        let words = &words[start..];
        if let Some(denied) = self.denied(&words.join(" ")) {
            return denied;
        }

        let program = basename(&words[0]);
        if let Some(program) = self.is_confirm_program(program) {
            return Danger::ConfirmRequired(format!("runs `{program}`"));
        }
        let rest = &words[1..];

        if INTERPRETERS.contains(&program) {
            return match shell_payload(rest) {
                Some(payload) => self.classify_line(payload, depth + 1),
                None => Danger::Safe,
            };
        }
        if program == "eval" {
            return self.classify_line(&rest.join(" "), depth + 1);
        }
        if program == "find" {
            return self.classify_find(rest, depth);
        }
        if PASSTHROUGH.contains(&program) {
            // The wrapped program follows the wrapper's own flags,
            // assignments and durations.
            let wrapped = rest
                .iter()
                .position(|w| !w.starts_with('-') && !is_assignment(w) && !is_count(w));
            return match wrapped {
                Some(i) => self.classify_words(&rest[i..], depth + 1),
                None => Danger::Safe,
            };
        }
        Danger::Safe
    }

    fn classify_find(&self, args: &[String], depth: usize) -> Danger {
        let mut first_confirm = None;
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            if arg == "-delete" {
                first_confirm.get_or_insert(Danger::ConfirmRequired("runs `find -delete`".into()));
            } else if FIND_EXEC.contains(&arg) {
                let end = args[i + 1..]
                    .iter()
                    .position(|w| w == ";" || w == "+")
                    .map_or(args.len(), |n| i + 1 + n);
                match self.classify_words(&args[i + 1..end], depth + 1) {
                    Danger::Safe => {}
                    forbidden @ Danger::Forbidden(_) => return forbidden,
                    confirm => {
                        first_confirm.get_or_insert(confirm);
                    }
                }
                i = end;
            }
            i += 1;
        }
        first_confirm.unwrap_or(Danger::Safe)
    }

    fn is_confirm_program<'a>(&self, program: &'a str) -> Option<&'a str> {
        let base = program.split('.').next().unwrap_or(program);
        self.confirm_programs
            .iter()
            .any(|c| c == program || c == base)
            .then_some(program)
    }
}

fn read_only_words(words: &[String]) -> bool {
    let Some((first, rest)) = words.split_first() else {
        return true;
    };
    match basename(first) {
        "git" => rest
            .first()
            .is_some_and(|sub| READ_ONLY_GIT.contains(&sub.as_str())),
        "find" => !rest.iter().any(|w| {
            FIND_ACTIONS.contains(&w.as_str()) || FIND_EXEC.contains(&w.as_str())
        }),
        program => READ_ONLY_PROGRAMS.contains(&program),
    }
}

fn basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Counts and durations taken by wrappers, e.g. `timeout 10s` or `nice 5`.
fn is_count(word: &str) -> bool {
    word.starts_with(|c: char| c.is_ascii_digit())
}

/// The command line a shell would run for these arguments: the word after
/// `-c`, or after a flag cluster containing `c` such as `-lc`.
fn shell_payload(args: &[String]) -> Option<&str> {
    let flag = args
        .iter()
        .position(|w| w.starts_with('-') && !w.starts_with("--") && w.contains('c'))?;
    args.get(flag + 1).map(String::as_str)
}

/// Split a command line into segments of words.
///
/// Quotes and backslashes are removed from words. Segments end at pipes,
/// list operators, newlines, parentheses and command substitutions (also
/// inside double quotes). An unterminated quote runs to the end of the line.
fn shell_segments(line: &str) -> Vec<Vec<String>> {
    let mut lexer = Lexer::default();
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        let substitution = c == '`' || (c == '$' && chars.peek() == Some(&'('));
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    lexer.push(c);
                }
                continue;
            }
            Some(_) if c == '"' => {
                quote = None;
                continue;
            }
            Some(_) if c == '\\' => {
                if let Some(next) = chars.next() {
                    lexer.push(next);
                }
                continue;
            }
            Some(_) if !substitution => {
                lexer.push(c);
                continue;
            }
            _ => {}
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '\\' => {
                if let Some(next) = chars.next() {
                    lexer.push(next);
                }
            }
            '$' if substitution => {
                chars.next();
                quote = None;
                lexer.end_segment();
            }
            '`' | '|' | '&' | ';' | '\n' | '(' | ')' => {
                quote = None;
                lexer.end_segment();
            }
            c if c.is_whitespace() => lexer.end_word(),
            c => lexer.push(c),
        }
    }
    lexer.end_segment();
    lexer.segments
}

#[derive(Default)]
struct Lexer {
    segments: Vec<Vec<String>>,
    words: Vec<String>,
    word: String,
    in_word: bool,
}

impl Lexer {
    fn push(&mut self, c: char) {
        self.word.push(c);
        self.in_word = true;
    }

    fn end_word(&mut self) {
        if self.in_word {
            self.words.push(std::mem::take(&mut self.word));
            self.in_word = false;
        }
    }

    fn end_segment(&mut self) {
        self.end_word();
        if !self.words.is_empty() {
            self.segments.push(std::mem::take(&mut self.words));
        }
    }
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CommandPolicy {
        CommandPolicy::default()
    }

    #[test]
    fn all_builtin_patterns_compile() {
        assert_eq!(policy().deny.len(), DENY_PATTERNS.len());
    }

    #[test]
    fn safe_commands() {
        for cmd in ["ls -la", "cargo test", "git status && git diff", "grep -rn foo src | head"] {
            assert_eq!(policy().classify(cmd), Danger::Safe, "{cmd}");
        }
    }

    #[test]
    fn confirm_required_anywhere_in_pipeline() {
        for cmd in [
            "rm -rf target",
            "/bin/rm file.txt",
            "cargo build && rm -r dist",
            "ls; sudo apt install x",
            "find . -name '*.o' | xargs rm",
            "FOO=1 chmod +x run.sh",
            "echo $(kill 1234)",
            "mkfs.ext4 image.img",
        ] {
            assert!(
                policy().classify(cmd).requires_confirmation(),
                "{cmd} should require confirmation"
            );
        }
    }

    #[test]
    fn forbidden_patterns() {
        for cmd in [
            "rm -rf /",
            "rm -rf /*",
            "sudo rm -rf --no-preserve-root /",
            "mkfs.ext4 /dev/sda1",
            "echo x > /dev/sda",
            "dd if=/dev/zero of=/dev/nvme0n1",
            ":(){ :|:& };:",
        ] {
            assert!(
                matches!(policy().classify(cmd), Danger::Forbidden(_)),
                "{cmd} should be forbidden"
            );
        }
    }

    #[test]
    fn rm_of_relative_path_is_not_forbidden() {
        assert!(policy().classify("rm -rf ./build").requires_confirmation());
    }

    #[test]
    fn argv_classification() {
        let p = policy();
        assert_eq!(p.classify_argv("cargo", &["test".into()]), Danger::Safe);
        assert!(p.classify_argv("rm", &["-r".into(), "x".into()]).requires_confirmation());
        assert!(matches!(
            p.classify_argv("rm", &["-rf".into(), "/".into()]),
            Danger::Forbidden(_)
        ));
        // Arguments are quoted, so shell metacharacters in them are inert.
        assert_eq!(p.classify_argv("echo", &["a; rm b".into()]), Danger::Safe);
    }

    #[test]
    fn segments_follow_shell_quoting() {
        assert_eq!(
            shell_segments(r#"echo "a; b" 'c|d' e\ f && ls"#),
            vec![
                vec!["echo".to_string(), "a; b".into(), "c|d".into(), "e f".into()],
                vec!["ls".to_string()],
            ]
        );
        assert_eq!(
            shell_segments(r#"echo "today is $(date)""#),
            vec![vec!["echo".to_string(), "today is ".into()], vec!["date".to_string()]]
        );
    }

    #[test]
    fn shell_payloads_are_inspected() {
        for cmd in [
            "bash -c 'rm -rf src'",
            r#"sh -c "sudo reboot""#,
            "bash -lc 'cargo build && rm -r dist'",
            "env FOO=1 bash -c 'chmod +x run.sh'",
            r#"sh -c "sh -c 'kill 1'""#,
            r#"eval "rm notes.txt""#,
            r#"find . -name '*.rs' | xargs sh -c 'rm "$0"'"#,
        ] {
            assert!(
                policy().classify(cmd).requires_confirmation(),
                "{cmd} should require confirmation"
            );
        }
        assert!(matches!(
            policy().classify("bash -c 'rm -rf /'"),
            Danger::Forbidden(_)
        ));
        assert_eq!(policy().classify("bash -c 'cargo test'"), Danger::Safe);
        assert_eq!(policy().classify("sh build.sh"), Danger::Safe);
    }

    #[test]
    fn keywords_and_quoting_do_not_hide_the_program() {
        for cmd in [
            "if true; then rm -rf src; fi",
            "for f in *.o; do rm $f; done",
            "while false; do :; done || { kill 1; }",
            r#""rm" -rf src"#,
            r"\rm -rf src",
            "'/bin/rm' notes.txt",
            "timeout 10s rm -r dist",
            "nice -n 5 chown me file",
        ] {
            assert!(
                policy().classify(cmd).requires_confirmation(),
                "{cmd} should require confirmation"
            );
        }
        assert!(matches!(policy().classify(r#""rm" -rf /"#), Danger::Forbidden(_)));
        assert_eq!(policy().classify(r#"echo "rm is dangerous""#), Danger::Safe);
    }

    #[test]
    fn find_actions() {
        let p = policy();
        assert!(p.classify("find . -delete").requires_confirmation());
        assert!(p.classify("find . -name '*.o' -exec rm {} \\;").requires_confirmation());
        assert!(p.classify("find . -type f -execdir chmod 644 {} +").requires_confirmation());
        assert_eq!(p.classify("find . -name '*.rs' -exec grep -n foo {} +"), Danger::Safe);
        assert_eq!(p.classify("find src -name '*.rs' -print"), Danger::Safe);
    }

    #[test]
    fn argv_shell_payloads() {
        let p = policy();
        assert!(
            p.classify_argv("sh", &["-c".into(), "rm -rf src".into()])
                .requires_confirmation()
        );
        assert!(matches!(
            p.classify_argv("bash", &["-c".into(), "rm -rf /".into()]),
            Danger::Forbidden(_)
        ));
        assert!(
            p.classify_argv("find", &[".".into(), "-delete".into()])
                .requires_confirmation()
        );
        assert_eq!(
            p.classify_argv("sh", &["-c".into(), "cargo fmt".into()]),
            Danger::Safe
        );
    }

    #[test]
    fn deep_nesting_needs_confirmation() {
        let mut cmd = "ls".to_string();
        for _ in 0..=MAX_DEPTH + 1 {
            cmd = format!("eval {}", shell_quote(&cmd));
        }
        assert!(policy().classify(&cmd).requires_confirmation());
    }

    #[test]
    fn read_only_detection() {
        let p = policy();
        for cmd in ["ls -la", "git diff HEAD~1 | head -40", "grep -rn foo src | wc -l", "find src -name '*.rs'"] {
            assert!(p.is_read_only(cmd), "{cmd}");
        }
        for cmd in [
            "cargo test",
            "cat a > b",
            "git checkout main",
            "find . -name '*.o' -exec rm {} +",
            "ls; rm x",
            "bash -c 'ls'",
            "",
        ] {
            assert!(!p.is_read_only(cmd), "{cmd}");
        }
        assert!(p.is_read_only_argv("git", &["log".into(), "-3".into()]));
        assert!(!p.is_read_only_argv("git", &["push".into()]));
    }

    #[test]
    fn custom_entries() {
        let p = policy()
            .with_confirm_program("terraform")
            .with_deny_pattern(r"\bgit\s+push\s+--force")
            .unwrap();
        assert!(p.classify("terraform apply").requires_confirmation());
        assert!(matches!(p.classify("git push --force"), Danger::Forbidden(_)));
    }
}
