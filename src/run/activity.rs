//! Human-readable descriptions of engine activity.
//!
//! Tool executions, agent tasks and phase signals are classified through
//! ordered rule tables. The first matching rule wins. Rule text may use the
//! placeholders `{path}`, `{method}` and `{action}`; a rule whose
//! placeholders cannot be filled from the tool arguments does not match.

use crate::engine::ToolExecution;
use crate::models::ScanPhase;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Bookkeeping tools that never appear in the activity log.
pub const SKIPPED_TOOLS: &[&str] = &[
    "think",
    "create_agent",
    "send_message_to_agent",
    "wait_for_message",
    "agent_finish",
    "finish_scan",
    "create_todo",
    "list_todos",
    "update_todo",
    "subagent_start_info",
    "scan_start_info",
];

const MAX_PATH_CHARS: usize = 35;
const MAX_THOUGHT_CHARS: usize = 60;
const DEFAULT_THOUGHT: &str = "Analyzing target...";
const FALLBACK_AGENT_NAMES: &[&str] = &[
    "Alpha", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel",
];

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"']+"#).expect("url regex should compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Lowercased argument contains any of the needles.
    Contains,
    /// Argument equals one of the needles exactly.
    Equals,
}

/// One predicate on a tool argument.
#[derive(Debug, Clone, Copy)]
pub struct Condition {
    pub field: &'static str,
    pub any_of: &'static [&'static str],
    pub mode: Match,
}

const fn contains(field: &'static str, any_of: &'static [&'static str]) -> Condition {
    Condition {
        field,
        any_of,
        mode: Match::Contains,
    }
}

const fn equals(field: &'static str, any_of: &'static [&'static str]) -> Condition {
    Condition {
        field,
        any_of,
        mode: Match::Equals,
    }
}

impl Condition {
    fn holds(&self, args: &Value) -> bool {
        let value = arg_text(args, self.field);
        match self.mode {
            Match::Contains => {
                let lower = value.to_lowercase();
                self.any_of.iter().any(|needle| lower.contains(needle))
            }
            Match::Equals => self.any_of.iter().any(|needle| value == *needle),
        }
    }
}

/// Maps a tool call satisfying every condition to a text template.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub tool: &'static str,
    pub when: &'static [Condition],
    pub text: &'static str,
}

impl Rule {
    fn apply(&self, tool_name: &str, args: &Value) -> Option<String> {
        if self.tool != tool_name || !self.when.iter().all(|c| c.holds(args)) {
            return None;
        }
        render(self.text, args)
    }
}

const SCANNERS: &[&str] = &["nmap", "masscan", "naabu"];
const FETCHERS: &[&str] = &["curl", "wget", "httpx"];

/// Activity log descriptions.
pub static ACTION_RULES: &[Rule] = &[
    Rule { tool: "terminal_execute", when: &[contains("command", SCANNERS), contains("command", &["443", "https"])], text: "[RECON] Port scanning HTTPS services" },
    Rule { tool: "terminal_execute", when: &[contains("command", SCANNERS), contains("command", &["80", "http"])], text: "[RECON] Port scanning HTTP services" },
    Rule { tool: "terminal_execute", when: &[contains("command", SCANNERS)], text: "[RECON] Scanning for open ports" },
    Rule { tool: "terminal_execute", when: &[contains("command", FETCHERS)], text: "[PROBE] Testing {path}" },
    Rule { tool: "terminal_execute", when: &[contains("command", FETCHERS)], text: "[PROBE] Fetching HTTP response" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["nuclei"])], text: "[SCAN] Running Nuclei vulnerability templates" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["nikto"])], text: "[SCAN] Running Nikto web scanner" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["wpscan"])], text: "[SCAN] Scanning WordPress installation" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["sqlmap"])], text: "[SQLI] Testing for SQL injection" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["subfinder", "amass"])], text: "[RECON] Discovering subdomains" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["ffuf", "gobuster", "dirb"])], text: "[RECON] Fuzzing directories and files" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["grep", "awk", "sed"])], text: "[ANALYZE] Processing scan results" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["cat", "head", "tail"])], text: "[ANALYZE] Reviewing collected data" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["echo"]), contains("command", &["workspace"])], text: "[INIT] Setting up test environment" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["mkdir"])], text: "[INIT] Creating workspace directories" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["dns", "dig", "nslookup"])], text: "[RECON] Performing DNS lookups" },
    Rule { tool: "terminal_execute", when: &[contains("command", &["cd "]), contains("command", &["echo", "set -e"])], text: "[INIT] Initializing test environment" },
    Rule { tool: "terminal_execute", when: &[], text: "[EXEC] Running security test" },
    Rule { tool: "browser_action", when: &[equals("action", &["goto"]), contains("url", &["login", "auth"])], text: "[AUTH] Testing login page" },
    Rule { tool: "browser_action", when: &[equals("action", &["goto"]), contains("url", &["admin"])], text: "[AUTH] Probing admin interface" },
    Rule { tool: "browser_action", when: &[equals("action", &["goto"]), contains("url", &["api"])], text: "[PROBE] Testing API endpoint" },
    Rule { tool: "browser_action", when: &[equals("action", &["goto"])], text: "[PROBE] Navigating to {path}" },
    Rule { tool: "browser_action", when: &[equals("action", &["goto"])], text: "[PROBE] Loading target page" },
    Rule { tool: "browser_action", when: &[equals("action", &["click"])], text: "[PROBE] Clicking page element" },
    Rule { tool: "browser_action", when: &[equals("action", &["fill"])], text: "[PROBE] Injecting test payload into form" },
    Rule { tool: "browser_action", when: &[equals("action", &["screenshot"])], text: "[RECON] Capturing page screenshot" },
    Rule { tool: "browser_action", when: &[equals("action", &["launch"])], text: "[INIT] Launching browser" },
    Rule { tool: "browser_action", when: &[equals("action", &["view_source"])], text: "[RECON] Analyzing page source code" },
    Rule { tool: "browser_action", when: &[], text: "[PROBE] Browser: {action}" },
    Rule { tool: "send_request", when: &[contains("body", &["'", "\"", "union", "select", "--"])], text: "[SQLI] Testing SQL injection via {method}" },
    Rule { tool: "send_request", when: &[contains("body", &["<script", "javascript:", "onerror"])], text: "[XSS] Testing XSS via {method}" },
    Rule { tool: "send_request", when: &[contains("body", &["../", "..\\", "/etc/passwd"])], text: "[PATH] Testing path traversal via {method}" },
    Rule { tool: "send_request", when: &[contains("url", &["user", "profile"])], text: "[IDOR] {method} testing user access control" },
    Rule { tool: "send_request", when: &[contains("url", &["admin"])], text: "[AUTH] {method} testing admin access" },
    Rule { tool: "send_request", when: &[], text: "[PROBE] {method} request to {path}" },
    Rule { tool: "send_request", when: &[], text: "[PROBE] Sending {method} request" },
    Rule { tool: "python_action", when: &[], text: "[ANALYZE] Running analysis script" },
    Rule { tool: "naabu", when: &[], text: "[RECON] Fast port scanning with Naabu" },
    Rule { tool: "list_requests", when: &[], text: "[ANALYZE] Reviewing captured HTTP traffic" },
    Rule { tool: "view_request", when: &[], text: "[ANALYZE] Inspecting HTTP request details" },
    Rule { tool: "create_note", when: &[], text: "[NOTE] Recording security finding" },
];

/// What an active agent appears to be doing, from its latest tool call.
pub static THOUGHT_RULES: &[Rule] = &[
    Rule { tool: "terminal_execute", when: &[contains("command", &["nmap", "masscan"])], text: "Scanning for open ports and services..." },
    Rule { tool: "terminal_execute", when: &[contains("command", &["curl", "wget"])], text: "Fetching and analyzing HTTP responses..." },
    Rule { tool: "terminal_execute", when: &[contains("command", &["nuclei"])], text: "Running vulnerability templates..." },
    Rule { tool: "terminal_execute", when: &[contains("command", &["sqlmap"])], text: "Testing SQL injection vectors..." },
    Rule { tool: "terminal_execute", when: &[contains("command", &["subfinder", "amass"])], text: "Discovering subdomains..." },
    Rule { tool: "terminal_execute", when: &[contains("command", &["grep", "cat"])], text: "Analyzing collected data..." },
    Rule { tool: "terminal_execute", when: &[], text: "Executing security test..." },
    Rule { tool: "browser_action", when: &[equals("action", &["goto"])], text: "Navigating to target page..." },
    Rule { tool: "browser_action", when: &[equals("action", &["click"])], text: "Interacting with page elements..." },
    Rule { tool: "browser_action", when: &[equals("action", &["fill"])], text: "Testing form inputs with payloads..." },
    Rule { tool: "browser_action", when: &[equals("action", &["screenshot"])], text: "Capturing page state for analysis..." },
    Rule { tool: "browser_action", when: &[], text: "Performing browser interaction..." },
    Rule { tool: "send_request", when: &[], text: "Sending {method} request to test endpoint..." },
    Rule { tool: "view_request", when: &[], text: "Analyzing captured HTTP traffic..." },
    Rule { tool: "list_requests", when: &[], text: "Reviewing intercepted requests..." },
];

/// Agent display names keyed on task keywords.
pub static AGENT_LABEL_RULES: &[(&[&str], &str)] = &[
    (&["recon", "discover", "enumerate", "subdomain", "dns"], "Recon Agent"),
    (&["sql", "injection", "database"], "SQLi Scanner"),
    (&["xss", "script", "cross-site"], "XSS Scanner"),
    (&["auth", "login", "session", "password"], "Auth Tester"),
    (&["api", "endpoint", "rest"], "API Prober"),
    (&["ssrf", "request forgery"], "SSRF Scanner"),
    (&["path", "traversal", "directory"], "Path Traversal"),
    (&["header", "security header", "cors"], "Header Analyzer"),
    (&["port", "scan", "service"], "Port Scanner"),
    (&["browser", "click", "form"], "Browser Agent"),
];

/// A tool call that signals the scan reached a phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseSignal {
    pub tool: &'static str,
    pub when: &'static [Condition],
    pub phase: ScanPhase,
}

pub static PHASE_SIGNALS: &[PhaseSignal] = &[
    PhaseSignal { tool: "terminal_execute", when: &[contains("command", &["sqlmap", "union", "select"])], phase: ScanPhase::Attack },
    PhaseSignal { tool: "terminal_execute", when: &[contains("command", &["nuclei", "nikto"])], phase: ScanPhase::Attack },
    PhaseSignal { tool: "terminal_execute", when: &[contains("command", &["nmap", "masscan", "subfinder"])], phase: ScanPhase::Recon },
    PhaseSignal { tool: "send_request", when: &[], phase: ScanPhase::Probe },
    PhaseSignal { tool: "browser_action", when: &[], phase: ScanPhase::Probe },
    PhaseSignal { tool: "naabu", when: &[], phase: ScanPhase::Recon },
    PhaseSignal { tool: "list_requests", when: &[], phase: ScanPhase::Recon },
];

/// Activity log line for a tool call, e.g. `[RECON] Scanning for open ports`.
pub fn describe_action(tool_name: &str, args: &Value) -> String {
    ACTION_RULES
        .iter()
        .find_map(|rule| rule.apply(tool_name, args))
        .unwrap_or_else(|| format!("[EXEC] {}", title_case(tool_name)))
}

/// Short status line for an active agent.
pub fn agent_thought(last_call: Option<(&str, &Value)>, task: &str) -> String {
    if let Some((tool_name, args)) = last_call {
        if let Some(thought) = THOUGHT_RULES.iter().find_map(|rule| rule.apply(tool_name, args)) {
            return thought;
        }
    }

    let task = task.trim();
    if task.is_empty() {
        return DEFAULT_THOUGHT.to_string();
    }
    if task.chars().count() > MAX_THOUGHT_CHARS {
        let head: String = task.chars().take(MAX_THOUGHT_CHARS).collect();
        format!("{}...", head)
    } else {
        task.to_string()
    }
}

/// Display label for the `index`-th active agent.
pub fn agent_label(task: &str, index: usize) -> String {
    let task = task.to_lowercase();
    AGENT_LABEL_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| task.contains(k)))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| {
            format!(
                "Agent {}",
                FALLBACK_AGENT_NAMES[index % FALLBACK_AGENT_NAMES.len()]
            )
        })
}

/// Most advanced phase evidenced by the tool history.
pub fn detect_phase(executions: &[ToolExecution], vulnerabilities_found: usize) -> ScanPhase {
    if vulnerabilities_found > 0 {
        return ScanPhase::Analyze;
    }

    executions
        .iter()
        .flat_map(|exec| {
            PHASE_SIGNALS
                .iter()
                .filter(move |s| s.tool == exec.tool_name && s.when.iter().all(|c| c.holds(&exec.args)))
                .map(|s| s.phase)
        })
        .max()
        .unwrap_or(ScanPhase::Init)
}

fn arg_text(args: &Value, field: &str) -> String {
    match args.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn render(template: &str, args: &Value) -> Option<String> {
    let mut text = template.to_string();

    if text.contains("{path}") {
        text = text.replace("{path}", &url_label(args)?);
    }
    if text.contains("{method}") {
        let method = arg_text(args, "method");
        let method = if method.trim().is_empty() {
            "GET".to_string()
        } else {
            method.trim().to_uppercase()
        };
        text = text.replace("{method}", &method);
    }
    if text.contains("{action}") {
        text = text.replace("{action}", &arg_text(args, "action"));
    }

    Some(text)
}

/// Path of the call's URL, or its host when the path is trivial.
fn url_label(args: &Value) -> Option<String> {
    let raw = match arg_text(args, "url") {
        url if !url.trim().is_empty() => url,
        _ => URL_REGEX.find(&arg_text(args, "command"))?.as_str().to_string(),
    };

    let label = match url::Url::parse(raw.trim()) {
        Ok(parsed) if parsed.path().len() > 1 => parsed.path().to_string(),
        Ok(parsed) => parsed.host_str().unwrap_or("/").to_string(),
        Err(_) => raw.trim().to_string(),
    };

    Some(label.chars().take(MAX_PATH_CHARS).collect())
}

fn title_case(tool_name: &str) -> String {
    tool_name
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec(tool: &str, args: Value) -> ToolExecution {
        ToolExecution {
            id: 0,
            tool_name: tool.to_string(),
            args,
            started_at: String::new(),
            status: "completed".to_string(),
        }
    }

    #[test]
    fn test_terminal_descriptions() {
        let cases = [
            ("nmap -p 443 example.com", "[RECON] Port scanning HTTPS services"),
            ("naabu -host example.com -p 80", "[RECON] Port scanning HTTP services"),
            ("masscan 10.0.0.0/8", "[RECON] Scanning for open ports"),
            ("curl -s https://example.com/api/v1/users", "[PROBE] Testing /api/v1/users"),
            ("curl -s https://example.com/", "[PROBE] Testing example.com"),
            ("wget -q localhost", "[PROBE] Fetching HTTP response"),
            ("nuclei -u https://x", "[SCAN] Running Nuclei vulnerability templates"),
            ("sqlmap -u x --batch", "[SQLI] Testing for SQL injection"),
            ("ffuf -w words.txt", "[RECON] Fuzzing directories and files"),
            ("mkdir -p /tmp/out", "[INIT] Creating workspace directories"),
            ("python3 exploit.py", "[EXEC] Running security test"),
        ];
        for (command, expected) in cases {
            assert_eq!(
                describe_action("terminal_execute", &json!({ "command": command })),
                expected,
                "command: {}",
                command
            );
        }
    }

    #[test]
    fn test_browser_descriptions() {
        assert_eq!(
            describe_action("browser_action", &json!({"action": "goto", "url": "https://x.io/Login"})),
            "[AUTH] Testing login page"
        );
        assert_eq!(
            describe_action("browser_action", &json!({"action": "goto", "url": "https://x.io/pricing"})),
            "[PROBE] Navigating to /pricing"
        );
        assert_eq!(
            describe_action("browser_action", &json!({"action": "goto"})),
            "[PROBE] Loading target page"
        );
        assert_eq!(
            describe_action("browser_action", &json!({"action": "scroll_down"})),
            "[PROBE] Browser: scroll_down"
        );
    }

    #[test]
    fn test_request_descriptions() {
        assert_eq!(
            describe_action("send_request", &json!({"method": "post", "body": "id=1 UNION SELECT"})),
            "[SQLI] Testing SQL injection via POST"
        );
        assert_eq!(
            describe_action("send_request", &json!({"body": "<script>alert(1)</script>"})),
            "[XSS] Testing XSS via GET"
        );
        assert_eq!(
            describe_action("send_request", &json!({"method": "GET", "url": "https://x.io/users/2"})),
            "[IDOR] GET testing user access control"
        );
        assert_eq!(
            describe_action("send_request", &json!({"method": "PUT", "url": "https://x.io/cart"})),
            "[PROBE] PUT request to /cart"
        );
        assert_eq!(describe_action("send_request", &json!({})), "[PROBE] Sending GET request");
    }

    #[test]
    fn test_unknown_tool_is_title_cased() {
        assert_eq!(describe_action("dump_cookies", &json!({})), "[EXEC] Dump Cookies");
        assert_eq!(describe_action("create_note", &json!({})), "[NOTE] Recording security finding");
    }

    #[test]
    fn test_agent_labels() {
        assert_eq!(agent_label("Enumerate subdomains of target", 0), "Recon Agent");
        assert_eq!(agent_label("Test login for weak passwords", 0), "Auth Tester");
        assert_eq!(agent_label("", 0), "Agent Alpha");
        assert_eq!(agent_label("misc", 9), "Agent Bravo");
    }

    #[test]
    fn test_agent_thoughts() {
        let args = json!({"command": "sqlmap -u https://x"});
        assert_eq!(
            agent_thought(Some(("terminal_execute", &args)), "task"),
            "Testing SQL injection vectors..."
        );
        assert_eq!(agent_thought(Some(("think", &json!({}))), ""), "Analyzing target...");
        let long_task = "a".repeat(70);
        assert_eq!(agent_thought(None, &long_task), format!("{}...", "a".repeat(60)));
    }

    #[test]
    fn test_detect_phase() {
        assert_eq!(detect_phase(&[], 0), ScanPhase::Init);
        let history = vec![
            exec("terminal_execute", json!({"command": "nmap -sV x"})),
            exec("browser_action", json!({"action": "goto"})),
        ];
        assert_eq!(detect_phase(&history, 0), ScanPhase::Probe);

        let mut attack = history.clone();
        attack.push(exec("terminal_execute", json!({"command": "nuclei -u x"})));
        assert_eq!(detect_phase(&attack, 0), ScanPhase::Attack);
        assert_eq!(detect_phase(&history, 2), ScanPhase::Analyze);
    }
}
