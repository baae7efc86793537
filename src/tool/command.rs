//! Command templates and concrete tool commands

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Placeholders a template may reference
pub const PLACEHOLDERS: &[&str] = &["file", "dir", "root", "config", "output", "range"];

/// Template errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("command template is empty")]
    Empty,

    #[error("unknown placeholder '{{{name}}}' in '{arg}'")]
    UnknownPlaceholder { name: String, arg: String },

    #[error("placeholder '{{{name}}}' has no value for this invocation")]
    MissingValue { name: String },
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern compiles"))
}

/// Values substituted into a template
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a placeholder value (builder style)
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// An argv with `{placeholder}` slots, e.g. `kubeconform -strict {file}`
///
/// Only `{name}` where `name` is lowercase letters or underscores counts as a
/// placeholder, so literal YAML flow mappings such as
/// `{extends: default}` pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl CommandTemplate {
    /// Build a template, rejecting empty argv and unknown placeholders
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Result<Self, TemplateError> {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        for arg in &argv {
            for caps in placeholder_re().captures_iter(arg) {
                let name = &caps[1];
                if !PLACEHOLDERS.contains(&name) {
                    return Err(TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        arg: arg.clone(),
                    });
                }
            }
        }

        Ok(Self { argv })
    }

    /// Built-in templates are written against [`PLACEHOLDERS`] and skip
    /// validation
    pub(crate) fn builtin(argv: &[&str]) -> Self {
        Self {
            argv: argv.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Tool name (first argv element)
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Placeholders referenced anywhere in the template
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .argv
            .iter()
            .flat_map(|arg| placeholder_re().captures_iter(arg).map(|c| c[1].to_string()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Append an argument
    pub fn push_arg(&mut self, arg: impl Into<String>) {
        self.argv.push(arg.into());
    }

    /// Remove every argument equal to `arg`
    pub fn remove_arg(&mut self, arg: &str) {
        let program = self.argv[0].clone();
        self.argv.retain(|a| a != arg);
        if self.argv.is_empty() {
            self.argv.push(program);
        }
    }

    /// Substitute placeholders, producing a runnable command
    pub fn render(&self, vars: &TemplateVars) -> Result<ToolCommand, TemplateError> {
        let mut rendered = Vec::with_capacity(self.argv.len());
        for arg in &self.argv {
            let mut missing = None;
            let value = placeholder_re().replace_all(arg, |caps: &regex_lite::Captures<'_>| {
                match vars.get(&caps[1]) {
                    Some(v) => v.to_string(),
                    None => {
                        missing.get_or_insert_with(|| caps[1].to_string());
                        String::new()
                    }
                }
            });
            if let Some(name) = missing {
                return Err(TemplateError::MissingValue { name });
            }
            rendered.push(value.into_owned());
        }

        let mut iter = rendered.into_iter();
        let program = iter.next().ok_or(TemplateError::Empty)?;
        Ok(ToolCommand::new(program).args(iter))
    }
}

impl TryFrom<Vec<String>> for CommandTemplate {
    type Error = TemplateError;

    fn try_from(argv: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(argv)
    }
}

impl From<CommandTemplate> for Vec<String> {
    fn from(template: CommandTemplate) -> Self {
        template.argv
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// A concrete command ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to the child's stdin; `None` closes stdin
    pub stdin: Option<Vec<u8>>,
    pub env: BTreeMap<String, String>,
    /// Working directory; `None` uses the invoker's root
    pub current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Command line for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholders() {
        let template =
            CommandTemplate::new(["kubeconform", "-strict", "-ignore-missing-schemas", "{file}"]).unwrap();
        let vars = TemplateVars::new().with("file", "base/deployment.yaml");

        let cmd = template.render(&vars).unwrap();
        assert_eq!(cmd.program, "kubeconform");
        assert_eq!(
            cmd.args,
            vec!["-strict", "-ignore-missing-schemas", "base/deployment.yaml"]
        );
    }

    #[test]
    fn test_placeholder_inside_argument() {
        let template = CommandTemplate::new(["tool", "--out={output}"]).unwrap();
        let cmd = template
            .render(&TemplateVars::new().with("output", "CHANGELOG.md"))
            .unwrap();
        assert_eq!(cmd.args, vec!["--out=CHANGELOG.md"]);
    }

    #[test]
    fn test_yaml_flow_mapping_is_not_a_placeholder() {
        let config = "{extends: default, rules: {line-length: {max: 120}}}";
        let template = CommandTemplate::new(["yamllint", "-d", config, "."]).unwrap();
        assert!(template.placeholders().is_empty());

        let cmd = template.render(&TemplateVars::new()).unwrap();
        assert_eq!(cmd.args[1], config);
    }

    #[test]
    fn test_substituted_value_not_rescanned() {
        let template = CommandTemplate::new(["yamllint", "-d", "{config}"]).unwrap();
        let cmd = template
            .render(&TemplateVars::new().with("config", "{file}"))
            .unwrap();
        assert_eq!(cmd.args[1], "{file}");
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let err = CommandTemplate::new(["tool", "{fiel}"]).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { ref name, .. } if name == "fiel"));
    }

    #[test]
    fn test_missing_value_rejected() {
        let template = CommandTemplate::new(["kustomize", "build", "{dir}"]).unwrap();
        let err = template.render(&TemplateVars::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingValue { name: "dir".to_string() });
    }

    #[test]
    fn test_empty_template_rejected() {
        assert_eq!(CommandTemplate::new(Vec::<String>::new()).unwrap_err(), TemplateError::Empty);
        assert_eq!(CommandTemplate::new([" "]).unwrap_err(), TemplateError::Empty);
    }

    #[test]
    fn test_deserialize_from_list() {
        let template: CommandTemplate =
            serde_json::from_str(r#"["git-cliff", "--config", "{config}"]"#).unwrap();
        assert_eq!(template.program(), "git-cliff");
        assert_eq!(template.placeholders(), vec!["config"]);

        let bad: Result<CommandTemplate, _> = serde_json::from_str("[]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_remove_arg_keeps_program() {
        let mut template =
            CommandTemplate::new(["ggshield", "secret", "scan", "--exit-zero"]).unwrap();
        template.remove_arg("--exit-zero");
        assert_eq!(template.to_string(), "ggshield secret scan");

        template.push_arg("--exit-zero");
        assert_eq!(template.argv().last().map(String::as_str), Some("--exit-zero"));
    }

    #[test]
    fn test_tool_command_display() {
        let cmd = ToolCommand::new("kustomize").arg("build").arg("overlays/prod");
        assert_eq!(cmd.display(), "kustomize build overlays/prod");
    }
}
