//! Built-in rule groups.
//!
//! Groups only affect authoring and enable flags. Within the assembled rule
//! set, rules are evaluated in the order they appear here.

use crate::security::rules::RuleAction;
use crate::security::types::EventCategory;

/// A rule definition before compilation.
#[derive(Debug, Clone, Copy)]
pub struct RuleDef {
    pub id: &'static str,
    pub description: &'static str,
    pub pattern: &'static str,
    pub action: RuleAction,
    pub score: u8,
}

pub const SQL_INJECTION: &[RuleDef] = &[
    RuleDef {
        id: "sqli-union-select",
        description: "UNION-based SQL injection",
        pattern: r"(?i)\bunion\b[\s(]+(all\s+)?select\b",
        action: RuleAction::Block,
        score: 9,
    },
    RuleDef {
        id: "sqli-tautology",
        description: "Boolean tautology after a quote",
        pattern: r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        action: RuleAction::Block,
        score: 8,
    },
    RuleDef {
        id: "sqli-stacked-query",
        description: "Stacked destructive statement",
        pattern: r"(?i);\s*(drop|delete|insert|update|alter|create|truncate|exec)\s+",
        action: RuleAction::Block,
        score: 9,
    },
    RuleDef {
        id: "sqli-comment-terminator",
        description: "Quote followed by a comment terminator",
        pattern: r#"(?i)['"]\s*(--(\s|$)|/\*)"#,
        action: RuleAction::Block,
        score: 7,
    },
    RuleDef {
        id: "sqli-time-based",
        description: "Time-based blind SQL injection",
        pattern: r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
        action: RuleAction::Block,
        score: 8,
    },
    RuleDef {
        id: "sqli-schema-probe",
        description: "Database schema enumeration",
        pattern: r"(?i)\b(information_schema|sysobjects|pg_catalog)\b",
        action: RuleAction::Block,
        score: 7,
    },
];

pub const XSS: &[RuleDef] = &[
    RuleDef {
        id: "xss-script-tag",
        description: "Script tag injection",
        pattern: r"(?i)<\s*/?\s*script\b",
        action: RuleAction::Block,
        score: 8,
    },
    RuleDef {
        id: "xss-event-handler",
        description: "Inline event handler attribute",
        pattern: r"(?i)<[^>]*\bon(load|error|click|mouseover|focus|blur|submit|toggle)\s*=",
        action: RuleAction::Block,
        score: 7,
    },
    RuleDef {
        id: "xss-javascript-uri",
        description: "javascript: URI",
        pattern: r"(?i)javascript\s*:",
        action: RuleAction::Block,
        score: 7,
    },
    RuleDef {
        id: "xss-embedded-frame",
        description: "Embedded frame or object",
        pattern: r"(?i)<\s*(iframe|object|embed|svg)\b",
        action: RuleAction::Block,
        score: 6,
    },
];

pub const PATH_TRAVERSAL: &[RuleDef] = &[
    RuleDef {
        id: "traversal-dot-dot",
        description: "Directory traversal sequence",
        pattern: r"\.\.[/\\]",
        action: RuleAction::Block,
        score: 8,
    },
    RuleDef {
        id: "traversal-sensitive-file",
        description: "Sensitive system file",
        pattern: r"(?i)(/etc/(passwd|shadow|hosts)|c:\\windows\\|boot\.ini|/proc/self/)",
        action: RuleAction::Block,
        score: 9,
    },
];

pub const SCANNER: &[RuleDef] = &[
    RuleDef {
        id: "scanner-user-agent",
        description: "Known vulnerability scanner",
        pattern: r"(?i)\b(sqlmap|nikto|nmap|masscan|acunetix|nessus|wpscan|dirbuster|gobuster|zgrab|nuclei)\b",
        action: RuleAction::Block,
        score: 7,
    },
    RuleDef {
        id: "scanner-probe-path",
        description: "Probe for common secrets or admin panels",
        pattern: r"(?i)/(\.env\b|\.git/|\.aws/|wp-admin|wp-login\.php|phpmyadmin|server-status)",
        action: RuleAction::Log,
        score: 4,
    },
];

pub const COMMAND_INJECTION: &[RuleDef] = &[
    RuleDef {
        id: "cmdi-chained-command",
        description: "Shell command chained after a separator",
        pattern: r"(?i)(;|\|\|?|&&)\s*(cat|ls|id|whoami|uname|wget|curl|nc|ncat|bash|sh|powershell)\b",
        action: RuleAction::Block,
        score: 9,
    },
    RuleDef {
        id: "cmdi-substitution",
        description: "Shell command substitution",
        pattern: r"\$\([^)]*\)|`[^`]+`",
        action: RuleAction::Block,
        score: 8,
    },
];

/// Groups in evaluation order, with their category.
pub fn groups() -> [(EventCategory, &'static [RuleDef]); 5] {
    [
        (EventCategory::SqlInjection, SQL_INJECTION),
        (EventCategory::Xss, XSS),
        (EventCategory::PathTraversal, PATH_TRAVERSAL),
        (EventCategory::Scanner, SCANNER),
        (EventCategory::CommandInjection, COMMAND_INJECTION),
    ]
}
