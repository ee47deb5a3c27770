//! Command pattern extraction
//!
//! Turns a tool call into a short permission-style tag used for grouping and
//! counting: non-shell tools map to their own name, shell commands map to
//! `Bash(<command>[:<subcommand>]:*)`.
//!
//! The shell grammar is deliberately heuristic. Commands are split on
//! whitespace only, so quoted arguments that contain spaces are not kept
//! together. Pattern tables in user configuration are written against this
//! exact tokenization.
//!
//! ```text
//! git push --force origin main   -> Bash(git:push:*)
//! sudo -u root rm -rf /tmp/x     -> Bash(sudo:rm:*)
//! FOO=1 nice -n 5 cargo build    -> Bash(cargo:build:*)
//! bash -c "make test"            -> Bash(make:*)
//! ```

use crate::types::{CommandEntry, CommandPattern};
use std::collections::{HashMap, HashSet};

/// Tool name of the shell tool whose input gets the command grammar.
pub const SHELL_TOOL: &str = "Bash";

/// Commands whose first non-flag argument is a meaningful verb
/// (`git push`, `cargo test`, `kubectl apply`). Everything else is
/// classified by command name alone.
pub const SUBCOMMAND_TOOLS: &[&str] = &[
    "git",
    "zfs",
    "zpool",
    "incus",
    "lxc",
    "podman",
    "docker",
    "kubectl",
    "helm",
    "systemctl",
    "launchctl",
    "nix",
    "nixos-rebuild",
    "home-manager",
    "go",
    "cargo",
    "npm",
    "yarn",
    "pnpm",
    "pip",
    "uv",
    "make",
    "gh",
    "tmux",
    "defaults",
    "alembic",
];

/// Maximum number of distinct examples kept per [`CommandPattern`].
pub const MAX_PATTERN_EXAMPLES: usize = 5;

/// sudo flags that take a separate argument
const SUDO_FLAGS_WITH_ARG: &[&str] = &["-u", "-g", "-C", "-D", "-h", "-p"];

const SHELLS: &[&str] = &["bash", "sh", "zsh"];

/// Convert a tool call into its pattern.
///
/// `input` is only consulted for the shell tool; every other tool's pattern
/// is its name.
pub fn extract_pattern(tool_name: &str, input: &str) -> String {
    if tool_name == SHELL_TOOL {
        shell_pattern(input)
    } else {
        tool_name.to_string()
    }
}

/// Number of subcommand tokens kept for `command`.
pub fn subcommand_depth(command: &str) -> usize {
    usize::from(SUBCOMMAND_TOOLS.contains(&command))
}

fn shell_pattern(command: &str) -> String {
    let tokens: Vec<&str> = command.split_whitespace().collect();

    let mut words = strip_env_assignments(&tokens);

    let sudo = words.first() == Some(&"sudo");
    if sudo {
        words = skip_sudo_flags(&words[1..]);
    }

    let mut words = unwrap_wrappers(words);

    // `bash -c "<script>"`: classify the script instead of the shell
    let script;
    let script_words: Vec<&str>;
    if let Some(s) = shell_script(words) {
        script = s;
        script_words = script.split_whitespace().collect();
        words = script_words.as_slice();
    }

    let Some((&command, mut rest)) = words.split_first() else {
        return if sudo {
            format!("{SHELL_TOOL}(sudo:*)")
        } else {
            SHELL_TOOL.to_string()
        };
    };

    let mut parts: Vec<&str> = Vec::with_capacity(3);
    if sudo {
        parts.push("sudo");
    }
    parts.push(command);

    for _ in 0..subcommand_depth(command) {
        rest = skip_flags(rest);
        match rest.split_first() {
            Some((&sub, tail)) => {
                parts.push(sub);
                rest = tail;
            }
            None => break,
        }
    }

    format!("{SHELL_TOOL}({}:*)", parts.join(":"))
}

fn is_flag(word: &str) -> bool {
    word.starts_with('-')
}

fn is_env_assignment(word: &str) -> bool {
    word.contains('=') && !is_flag(word)
}

fn skip_flags<'a, 'b>(words: &'b [&'a str]) -> &'b [&'a str] {
    let n = words.iter().take_while(|w| is_flag(w)).count();
    &words[n..]
}

/// `FOO=1 BAR=2 cmd ...` -> `cmd ...`
fn strip_env_assignments<'a, 'b>(words: &'b [&'a str]) -> &'b [&'a str] {
    let n = words.iter().take_while(|w| is_env_assignment(w)).count();
    &words[n..]
}

fn skip_sudo_flags<'a, 'b>(words: &'b [&'a str]) -> &'b [&'a str] {
    let mut i = 0;
    while i < words.len() && is_flag(words[i]) {
        i += if SUDO_FLAGS_WITH_ARG.contains(&words[i]) {
            2
        } else {
            1
        };
    }
    &words[i.min(words.len())..]
}

/// Peel off `env`, `time`, `nohup`, `strace`, `ltrace`, `nice` and `xargs`
/// until the wrapped command is at the front.
fn unwrap_wrappers<'a, 'b>(mut words: &'b [&'a str]) -> &'b [&'a str] {
    loop {
        let Some((&first, rest)) = words.split_first() else {
            return words;
        };

        words = match first {
            "env" => {
                let n = rest
                    .iter()
                    .take_while(|w| w.contains('=') || is_flag(w))
                    .count();
                &rest[n..]
            }
            "time" | "nohup" | "strace" | "ltrace" => rest,
            "nice" => {
                let mut i = 0;
                while i < rest.len() && is_flag(rest[i]) {
                    i += if rest[i] == "-n" { 2 } else { 1 };
                }
                &rest[i.min(rest.len())..]
            }
            "xargs" => skip_flags(rest),
            _ => return words,
        };
    }
}

/// For `bash|sh|zsh ... -c <script>`, returns the word after `-c` with
/// surrounding quotes removed. Only that one word is taken: a quoted script
/// containing spaces has already been split, so just its first part remains.
fn shell_script(words: &[&str]) -> Option<String> {
    let (first, rest) = words.split_first()?;
    if !SHELLS.contains(first) {
        return None;
    }

    let pos = rest.iter().position(|w| *w == "-c")?;
    let script = rest.get(pos + 1)?;
    Some(script.trim_matches(|c| c == '"' || c == '\'').to_string())
}

/// Group commands by pattern.
///
/// Result is sorted by occurrence count (highest first), then by pattern.
pub fn aggregate_patterns(commands: &[CommandEntry]) -> Vec<CommandPattern> {
    let mut by_pattern: HashMap<&str, (CommandPattern, HashSet<&str>)> = HashMap::new();

    for cmd in commands {
        match by_pattern.get_mut(cmd.pattern.as_str()) {
            Some((agg, seen)) => {
                agg.count += 1;
                if cmd.timestamp > agg.last_seen {
                    agg.last_seen = cmd.timestamp;
                }
                if agg.examples.len() < MAX_PATTERN_EXAMPLES && seen.insert(cmd.raw_command.as_str()) {
                    agg.examples.push(cmd.raw_command.clone());
                }
            }
            None => {
                let agg = CommandPattern {
                    pattern: cmd.pattern.clone(),
                    tool_name: cmd.tool_name.clone(),
                    count: 1,
                    last_seen: cmd.timestamp,
                    examples: vec![cmd.raw_command.clone()],
                };
                let seen = HashSet::from([cmd.raw_command.as_str()]);
                by_pattern.insert(cmd.pattern.as_str(), (agg, seen));
            }
        }
    }

    let mut patterns: Vec<CommandPattern> = by_pattern.into_values().map(|(p, _)| p).collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    fn bash(cmd: &str) -> String {
        extract_pattern("Bash", cmd)
    }

    #[test]
    fn test_non_shell_tools_use_tool_name() {
        assert_eq!(extract_pattern("Edit", "/a/b.go"), "Edit");
        assert_eq!(extract_pattern("Write", "/path/to/file.go"), "Write");
        assert_eq!(extract_pattern("NotebookEdit", "/nb.ipynb"), "NotebookEdit");
        assert_eq!(extract_pattern("mcp__github__get_pr", "x"), "mcp__github__get_pr");
    }

    #[test]
    fn test_empty_command() {
        assert_eq!(bash(""), "Bash");
        assert_eq!(bash("   \t "), "Bash");
    }

    #[test]
    fn test_plain_commands() {
        assert_eq!(bash("ls -la"), "Bash(ls:*)");
        assert_eq!(bash("cat README.md"), "Bash(cat:*)");
        assert_eq!(bash("  rg foo  "), "Bash(rg:*)");
    }

    #[test]
    fn test_subcommand_tools() {
        assert_eq!(bash("git status"), "Bash(git:status:*)");
        assert_eq!(bash("git commit -m x"), "Bash(git:commit:*)");
        assert_eq!(bash("git push --force origin main"), "Bash(git:push:*)");
        assert_eq!(bash("git --no-pager log"), "Bash(git:log:*)");
        assert_eq!(bash("git"), "Bash(git:*)");
        assert_eq!(bash("cargo --version"), "Bash(cargo:*)");
        assert_eq!(bash("npm install express"), "Bash(npm:install:*)");
        assert_eq!(bash("kubectl -n prod get pods"), "Bash(kubectl:prod:*)");
    }

    #[test]
    fn test_env_assignments() {
        assert_eq!(bash("FOO=1 BAR=2 go test ./..."), "Bash(go:test:*)");
        assert_eq!(bash("FOO=bar npm run build"), "Bash(npm:run:*)");
        assert_eq!(bash("FOO=1"), "Bash");
    }

    #[test]
    fn test_sudo() {
        assert_eq!(bash("sudo rm -rf /tmp/x"), "Bash(sudo:rm:*)");
        assert_eq!(bash("sudo -u root apt update"), "Bash(sudo:apt:*)");
        assert_eq!(bash("sudo -E -g wheel systemctl restart nginx"), "Bash(sudo:systemctl:restart:*)");
        assert_eq!(bash("sudo"), "Bash(sudo:*)");
        assert_eq!(bash("sudo -u root"), "Bash(sudo:*)");
    }

    #[test]
    fn test_wrappers() {
        assert_eq!(bash("time make build"), "Bash(make:build:*)");
        assert_eq!(bash("nohup ./server &"), "Bash(./server:*)");
        assert_eq!(bash("nice -n 10 cargo build"), "Bash(cargo:build:*)");
        assert_eq!(bash("env -i PATH=/bin ls"), "Bash(ls:*)");
        assert_eq!(bash("xargs -0 -n1 rm"), "Bash(rm:*)");
        assert_eq!(bash("sudo nohup time docker ps"), "Bash(sudo:docker:ps:*)");
        assert_eq!(bash("time"), "Bash");
    }

    #[test]
    fn test_shell_invocation() {
        assert_eq!(bash("bash -c \"git status\""), "Bash(git:*)");
        assert_eq!(bash("bash -c git status"), "Bash(git:*)");
        assert_eq!(bash("bash -c \"make\""), "Bash(make:*)");
        assert_eq!(bash("sh -c 'ls -la'"), "Bash(ls:*)");
        assert_eq!(bash("zsh -lc foo"), "Bash(zsh:*)");
        assert_eq!(bash("bash script.sh"), "Bash(bash:*)");
        assert_eq!(bash("bash -c"), "Bash(bash:*)");
    }

    #[test]
    fn test_quoted_arguments_are_word_split() {
        // accepted limitation: quotes do not group words
        assert_eq!(bash("git \"commit message\""), "Bash(git:\"commit:*)");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let inputs = [
            "git push --force origin main",
            "sudo -u root rm -rf /",
            "FOO=1 nice -n 5 cargo build",
            "bash -c \"make test\"",
            "",
        ];
        for input in inputs {
            let first = bash(input);
            for _ in 0..3 {
                assert_eq!(bash(input), first);
            }
        }
    }

    fn entry(pattern: &str, raw: &str, minutes_ago: i64) -> CommandEntry {
        CommandEntry {
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            tool_name: "Bash".to_string(),
            pattern: pattern.to_string(),
            raw_command: raw.to_string(),
            session_id: "s".to_string(),
            uuid: format!("u-{raw}-{minutes_ago}"),
            line_number: 1,
            file_path: PathBuf::from("/tmp/s.jsonl"),
        }
    }

    #[test]
    fn test_aggregate_patterns() {
        let commands = vec![
            entry("Bash(git:status:*)", "git status", 10),
            entry("Edit", "/a.go", 9),
            entry("Bash(git:status:*)", "git status", 8),
            entry("Bash(git:status:*)", "git status -s", 2),
        ];

        let patterns = aggregate_patterns(&commands);
        assert_eq!(patterns.len(), 2);

        let git = &patterns[0];
        assert_eq!(git.pattern, "Bash(git:status:*)");
        assert_eq!(git.count, 3);
        assert_eq!(git.examples, vec!["git status", "git status -s"]);
        assert_eq!(git.last_seen, commands[3].timestamp);

        assert_eq!(patterns[1].pattern, "Edit");
        assert_eq!(patterns[1].count, 1);
    }

    #[test]
    fn test_aggregate_caps_examples() {
        let commands: Vec<_> = (0..8)
            .map(|i| entry("Bash(ls:*)", &format!("ls dir{i}"), i))
            .collect();

        let patterns = aggregate_patterns(&commands);
        assert_eq!(patterns[0].count, 8);
        assert_eq!(patterns[0].examples.len(), MAX_PATTERN_EXAMPLES);
        assert_eq!(patterns[0].examples[0], "ls dir0");
    }

    #[test]
    fn test_aggregate_ties_sorted_by_pattern() {
        let commands = vec![entry("Write", "/b", 1), entry("Edit", "/a", 1)];
        let names: Vec<_> = aggregate_patterns(&commands)
            .into_iter()
            .map(|p| p.pattern)
            .collect();
        assert_eq!(names, vec!["Edit", "Write"]);
    }
}
