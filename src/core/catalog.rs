//! Immutable phrase → command table with exact and substring lookups.

use std::collections::{BTreeMap, HashMap};

use crate::core::lib::{TaiError, TaiResult};
use crate::core::os::{OsDescriptor, Platform};

/// Inputs shorter than this never fuzzy-match; single letters would hit almost every phrase.
const MIN_FUZZY_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    pub phrase: String,
    pub command: String,
}

/// One built-in phrase with its per-platform commands.
struct Builtin {
    phrase: &'static str,
    unix: Option<&'static str>,
    macos: Option<&'static str>,
    windows: Option<&'static str>,
    distro: &'static [(&'static str, &'static str)],
}

impl Builtin {
    const fn unix(phrase: &'static str, command: &'static str) -> Self {
        Self {
            phrase,
            unix: Some(command),
            macos: None,
            windows: None,
            distro: &[],
        }
    }

    const fn packages(
        phrase: &'static str,
        distro: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            phrase,
            unix: None,
            macos: None,
            windows: None,
            distro,
        }
    }

    const fn macos(mut self, command: &'static str) -> Self {
        self.macos = Some(command);
        self
    }

    const fn windows(mut self, command: &'static str) -> Self {
        self.windows = Some(command);
        self
    }

    fn select(&self, os: &OsDescriptor) -> Option<&'static str> {
        match os.platform {
            Platform::Windows => self.windows,
            Platform::MacOs => self.macos.or(self.unix),
            Platform::Linux => os
                .distro_family()
                .and_then(|family| {
                    self.distro
                        .iter()
                        .find(|(name, _)| *name == family)
                        .map(|(_, cmd)| *cmd)
                })
                .or(self.unix),
            Platform::Other => self.unix,
        }
    }
}

const INSTALLED_PACKAGES: &[(&str, &str)] = &[
    ("debian", "dpkg -l"),
    ("arch", "pacman -Q"),
    ("fedora", "rpm -qa"),
    ("suse", "rpm -qa"),
    ("alpine", "apk info"),
];

const BUILTINS: &[Builtin] = &[
    Builtin::unix("list files", "ls -la").windows("dir"),
    Builtin::unix("list all files", "ls -la").windows("dir /a"),
    Builtin::unix("show files", "ls -la").windows("dir"),
    Builtin::unix("list hidden files", "ls -a").windows("dir /a:h"),
    Builtin::unix("go home", "cd ~").windows("cd ~"),
    Builtin::unix("go back", "cd ..").windows("cd .."),
    Builtin::unix("go up", "cd ..").windows("cd .."),
    Builtin::unix("where am i", "pwd"),
    Builtin::unix("show current directory", "pwd"),
    Builtin::unix("show disk usage", "df -h")
        .windows("wmic logicaldisk get caption,size,freespace"),
    Builtin::unix("show directory size", "du -sh ."),
    Builtin::unix("show memory usage", "free -h")
        .macos("vm_stat")
        .windows("systeminfo"),
    Builtin::unix("show running processes", "ps aux").windows("tasklist"),
    Builtin::unix("show processes", "ps aux").windows("tasklist"),
    Builtin::unix("who am i", "whoami").windows("whoami"),
    Builtin::unix("show hostname", "hostname").windows("hostname"),
    Builtin::unix("show date", "date"),
    Builtin::unix("show calendar", "cal"),
    Builtin::unix("show uptime", "uptime"),
    Builtin::unix("show system info", "uname -a").windows("systeminfo"),
    Builtin::unix("show kernel version", "uname -r").windows("ver"),
    Builtin::unix("show cpu info", "lscpu")
        .macos("sysctl -n machdep.cpu.brand_string")
        .windows("wmic cpu get name"),
    Builtin::unix("show ip address", "ip addr")
        .macos("ifconfig")
        .windows("ipconfig"),
    Builtin::unix("show network interfaces", "ip link")
        .macos("ifconfig -a")
        .windows("ipconfig /all"),
    Builtin::unix("show open ports", "ss -tuln")
        .macos("lsof -i -P -n")
        .windows("netstat -an"),
    Builtin::unix("check internet connection", "ping -c 4 8.8.8.8")
        .windows("ping -n 4 8.8.8.8"),
    Builtin::unix("show environment variables", "env"),
    Builtin::unix("show logged in users", "who").windows("query user"),
    Builtin::unix("clear screen", "clear"),
    Builtin::unix("show git status", "git status").windows("git status"),
    Builtin::unix("show git log", "git log --oneline -10").windows("git log --oneline -10"),
    Builtin::unix("show git branches", "git branch -a").windows("git branch -a"),
    Builtin::packages("list installed packages", INSTALLED_PACKAGES)
        .macos("brew list")
        .windows("winget list"),
];

/// Lower-cases and collapses runs of whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    /// Insertion order; fuzzy ties resolve to the earliest entry.
    entries: Vec<PatternEntry>,
    index: HashMap<String, usize>,
}

impl PatternCatalog {
    /// Built-in table with the command variant for `os`.
    pub fn for_os(os: &OsDescriptor) -> TaiResult<Self> {
        let catalog = Self::from_entries(
            BUILTINS
                .iter()
                .filter_map(|b| b.select(os).map(|cmd| (b.phrase, cmd))),
        )?;
        tracing::debug!(patterns = catalog.count(), os = %os, "pattern catalog loaded");
        Ok(catalog)
    }

    /// Builds a catalog from `(phrase, command)` pairs. Later duplicates
    /// replace the command but keep the first position.
    pub fn from_entries<I, P, C>(entries: I) -> TaiResult<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: AsRef<str>,
    {
        let mut catalog = Self::default();
        for (phrase, command) in entries {
            let phrase = normalize(phrase.as_ref());
            let command = command.as_ref().trim();
            if phrase.is_empty() {
                return Err(TaiError::Catalog(format!(
                    "empty phrase for command '{}'",
                    command
                )));
            }
            if command.is_empty() {
                return Err(TaiError::Catalog(format!(
                    "empty command for phrase '{}'",
                    phrase
                )));
            }
            match catalog.index.get(&phrase) {
                Some(&i) => catalog.entries[i].command = command.to_string(),
                None => {
                    catalog.index.insert(phrase.clone(), catalog.entries.len());
                    catalog.entries.push(PatternEntry {
                        phrase,
                        command: command.to_string(),
                    });
                }
            }
        }
        Ok(catalog)
    }

    pub fn lookup(&self, phrase: &str) -> Option<&str> {
        self.index
            .get(&normalize(phrase))
            .map(|&i| self.entries[i].command.as_str())
    }

    /// Entries whose phrase contains `term`, ignoring case.
    pub fn search(&self, term: &str) -> BTreeMap<String, String> {
        let term = normalize(term);
        if term.is_empty() {
            return BTreeMap::new();
        }
        self.entries
            .iter()
            .filter(|e| e.phrase.contains(&term))
            .map(|e| (e.phrase.clone(), e.command.clone()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn all(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.phrase.clone(), e.command.clone()))
            .collect()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.iter()
    }

    /// Best approximate match for an input that missed the exact lookup.
    ///
    /// Candidates are phrases that contain the input, plus phrases that
    /// appear word-aligned inside the input ("please list files now").
    /// The candidate sharing the longest common substring with the input
    /// wins; equal scores go to the earlier catalog entry. Inputs shorter
    /// than three characters never match, so "go" misses even though it
    /// appears in "go home".
    pub fn fuzzy_match(&self, input: &str) -> Option<&PatternEntry> {
        let input = normalize(input);
        if input.chars().count() < MIN_FUZZY_LEN {
            return None;
        }
        let padded = format!(" {} ", input);

        let mut best: Option<(usize, &PatternEntry)> = None;
        for entry in &self.entries {
            let contains_input = entry.phrase.contains(&input);
            let inside_input = padded.contains(&format!(" {} ", entry.phrase));
            if !contains_input && !inside_input {
                continue;
            }
            let score = longest_common_substring(&input, &entry.phrase);
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, entry));
            }
        }
        best.map(|(_, entry)| entry)
    }
}

/// Length in chars of the longest run shared by `a` and `b`.
fn longest_common_substring(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = vec![0usize; b.len() + 1];
    let mut longest = 0;
    for &ca in &a {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                cur[j + 1] = prev[j] + 1;
                longest = longest.max(cur[j + 1]);
            }
        }
        prev = cur;
    }
    longest
}
