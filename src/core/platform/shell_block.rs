//! Reading and rewriting the managed variable block inside shell rc files.
//!
//! Only the lines between the two markers belong to us; everything else in
//! the file is carried through untouched.

const BEGIN_MARKER: &str = "# BEGIN jvman managed block";
const END_MARKER: &str = "# END jvman managed block";

/// Assignment syntax of the target rc file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSyntax {
    /// `export NAME="value"` (sh, bash, zsh, profile.d).
    Posix,
    /// `set -gx NAME value...`
    Fish,
}

impl ShellSyntax {
    pub fn for_file(path: &std::path::Path) -> Self {
        if path.extension().and_then(|e| e.to_str()) == Some("fish") {
            ShellSyntax::Fish
        } else {
            ShellSyntax::Posix
        }
    }
}

/// Variables held in one managed block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedBlock {
    entries: Vec<(String, String)>,
}

impl ManagedBlock {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(key, _)| key != name);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order they are written out.
    fn ordered(&self) -> Vec<&(String, String)> {
        let mut ordered: Vec<_> = self.entries.iter().collect();
        ordered.sort_by(|a, b| (rank(&a.0), &a.0).cmp(&(rank(&b.0), &b.0)));
        ordered
    }
}

fn rank(name: &str) -> u8 {
    match name {
        "JAVA_HOME" => 0,
        "CLASSPATH" => 1,
        "PATH" => 2,
        _ => 3,
    }
}

/// Line range `[start, end]` of the managed block, if the file has one.
fn locate(lines: &[&str]) -> Option<(usize, usize)> {
    let start = lines.iter().position(|l| l.trim_end() == BEGIN_MARKER)?;
    let end = match lines[start + 1..]
        .iter()
        .position(|l| l.trim_end() == END_MARKER)
    {
        Some(offset) => start + 1 + offset,
        // Unterminated: claim only the assignment lines directly below the marker.
        None => {
            let run = lines[start + 1..]
                .iter()
                .take_while(|l| is_assignment(l))
                .count();
            start + run
        }
    };
    Some((start, end))
}

fn is_assignment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("export ") || line.starts_with("set -gx ")
}

/// Parse the managed block out of `content`. A file without one yields an
/// empty block.
pub fn parse(content: &str, syntax: ShellSyntax) -> ManagedBlock {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut block = ManagedBlock::default();
    let Some((start, end)) = locate(&lines) else {
        return block;
    };
    for line in &lines[start + 1..=end] {
        let parsed = match syntax {
            ShellSyntax::Posix => parse_export(line.trim()),
            ShellSyntax::Fish => parse_set(line.trim()),
        };
        if let Some((name, value)) = parsed {
            block.set(&name, &value);
        }
    }
    block
}

/// Whether `content` contains a managed block at all.
pub fn has_block(content: &str) -> bool {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    locate(&lines).is_some()
}

/// Rewrite `content` so its managed block holds exactly `block`. An empty
/// block removes the markers too.
pub fn render_into(content: &str, block: &ManagedBlock, syntax: ShellSyntax) -> String {
    let rendered = render_block(block, syntax);
    let lines: Vec<&str> = content.split_inclusive('\n').collect();

    match locate(&lines) {
        Some((start, end)) => {
            let mut out = String::with_capacity(content.len() + rendered.len());
            lines[..start].iter().for_each(|l| out.push_str(l));
            out.push_str(&rendered);
            lines[end + 1..].iter().for_each(|l| out.push_str(l));
            out
        }
        None if rendered.is_empty() => content.to_string(),
        None => {
            let mut out = content.to_string();
            if !out.is_empty() {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                if !out.ends_with("\n\n") {
                    out.push('\n');
                }
            }
            out.push_str(&rendered);
            out
        }
    }
}

fn render_block(block: &ManagedBlock, syntax: ShellSyntax) -> String {
    if block.is_empty() {
        return String::new();
    }
    let mut out = format!("{BEGIN_MARKER}\n");
    for (name, value) in block.ordered() {
        let line = match syntax {
            ShellSyntax::Posix => format!("export {}=\"{}\"", name, posix_value(name, value)),
            ShellSyntax::Fish => format!("set -gx {} {}", name, fish_arguments(name, value)),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

// Only whole `$NAME` entries of PATH stay live; every other `$` is literal.
fn posix_value(name: &str, value: &str) -> String {
    if name == "PATH" {
        value
            .split(':')
            .map(|entry| {
                if is_reference(entry) {
                    entry.to_string()
                } else {
                    escape_posix(entry)
                }
            })
            .collect::<Vec<_>>()
            .join(":")
    } else {
        escape_posix(value)
    }
}

fn escape_posix(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '`' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn is_reference(word: &str) -> bool {
    word.strip_prefix('$')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(false)
}

fn parse_export(line: &str) -> Option<(String, String)> {
    let (name, raw) = line.strip_prefix("export ")?.split_once('=')?;
    let value = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(inner) => unescape(inner),
        None => raw.to_string(),
    };
    Some((name.trim().to_string(), value))
}

fn fish_arguments(name: &str, value: &str) -> String {
    if name == "PATH" {
        value
            .split(':')
            .map(fish_word)
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        fish_word(value)
    }
}

fn fish_word(word: &str) -> String {
    if is_reference(word) {
        return word.to_string();
    }
    let mut out = String::with_capacity(word.len() + 2);
    out.push('"');
    for c in word.chars() {
        if matches!(c, '\\' | '"' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn parse_set(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("set -gx ")?;
    let mut words = split_fish_words(rest).into_iter();
    let name = words.next()?;
    let value = words.collect::<Vec<_>>().join(":");
    Some((name, value))
}

fn split_fish_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(first) = chars.next() else {
            break;
        };
        let mut word = String::new();
        if first == '"' {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    }
                    '"' => break,
                    other => word.push(other),
                }
            }
        } else {
            word.push(first);
            while let Some(c) = chars.peek().copied() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    words
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
