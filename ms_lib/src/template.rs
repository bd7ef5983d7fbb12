//! Rendering the aggregation job descriptor.
//!
//! Descriptor templates use a small mustache-like subset:
//!
//! - `{{name}}`, `{{fasta}}` and `{{output}}` anywhere,
//! - `{{#samples}} ... {{/samples}}` repeated per sample group, exposing
//!   `{{sample.name}}` and `{{sample.category}}`,
//! - `{{#files}} ... {{/files}}` inside a sample block, exposing `{{file}}`.
//!
//! Substituted values are XML-escaped. Unknown tags and unbalanced blocks are
//! errors.

use anyhow::{bail, ensure, Result};
use std::path::{Path, PathBuf};

/// Samples the aggregation tool treats as one biological sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGroup {
    pub name: String,
    pub category: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScaffoldJob {
    pub name: String,
    pub fasta: PathBuf,
    pub output: PathBuf,
    pub samples: Vec<SampleGroup>,
}

#[derive(Debug, PartialEq, Eq)]
enum Node {
    Text(String),
    Var(String),
    Section { name: String, body: Vec<Node> },
}

fn parse(template: &str) -> Result<Vec<Node>> {
    // open sections, innermost last; the root has no name
    let mut stack: Vec<(Option<String>, Vec<Node>)> = vec![(None, Vec::new())];
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            bail!("unterminated tag at '{}'", &rest[start..]);
        };
        let text = &rest[..start];
        let tag = rest[start + 2..start + 2 + len].trim();
        rest = &rest[start + 2 + len + 2..];

        let Some((_, nodes)) = stack.last_mut() else {
            bail!("template nesting underflow");
        };
        if !text.is_empty() {
            nodes.push(Node::Text(text.to_string()));
        }
        if let Some(name) = tag.strip_prefix('#') {
            stack.push((Some(name.trim().to_string()), Vec::new()));
        } else if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            match stack.pop() {
                Some((Some(open), body)) if open == name => match stack.last_mut() {
                    Some((_, parent)) => parent.push(Node::Section { name: open, body }),
                    None => bail!("template nesting underflow"),
                },
                Some((Some(open), _)) => bail!("{{{{/{name}}}}} closes {{{{#{open}}}}}"),
                _ => bail!("{{{{/{name}}}}} without a matching {{{{#{name}}}}}"),
            }
        } else {
            nodes.push(Node::Var(tag.to_string()));
        }
    }
    ensure!(stack.len() == 1, "unclosed block in template");
    let Some((_, mut nodes)) = stack.pop() else {
        bail!("template nesting underflow");
    };
    if !rest.is_empty() {
        nodes.push(Node::Text(rest.to_string()));
    }
    Ok(nodes)
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Clone, Copy)]
struct Scope<'a> {
    job: &'a ScaffoldJob,
    group: Option<&'a SampleGroup>,
    file: Option<&'a Path>,
}

impl Scope<'_> {
    fn lookup(&self, tag: &str) -> Result<String> {
        let value = match (tag, self.group, self.file) {
            ("name", _, _) => self.job.name.clone(),
            ("fasta", _, _) => self.job.fasta.display().to_string(),
            // the tool expects a directory with a trailing separator
            ("output", _, _) => format!("{}/", self.job.output.display()),
            ("sample.name", Some(group), _) => group.name.clone(),
            ("sample.category", Some(group), _) => group.category.clone(),
            ("file", _, Some(file)) => file.display().to_string(),
            _ => bail!("unknown or out-of-scope tag {{{{{tag}}}}}"),
        };
        Ok(xml_escape(&value))
    }
}

fn render_nodes(nodes: &[Node], scope: Scope<'_>, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(tag) => out.push_str(&scope.lookup(tag)?),
            Node::Section { name, body } => match (name.as_str(), scope.group) {
                ("samples", _) => {
                    for group in &scope.job.samples {
                        let inner = Scope {
                            group: Some(group),
                            ..scope
                        };
                        render_nodes(body, inner, out)?;
                    }
                }
                ("files", Some(group)) => {
                    for file in &group.files {
                        let inner = Scope {
                            file: Some(file),
                            ..scope
                        };
                        render_nodes(body, inner, out)?;
                    }
                }
                _ => bail!("unknown or out-of-scope block {{{{#{name}}}}}"),
            },
        }
    }
    Ok(())
}

pub fn render(template: &str, job: &ScaffoldJob) -> Result<String> {
    let nodes = parse(template)?;
    let mut out = String::with_capacity(template.len());
    let scope = Scope {
        job,
        group: None,
        file: None,
    };
    render_nodes(&nodes, scope, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job() -> ScaffoldJob {
        ScaffoldJob {
            name: "P1".to_string(),
            fasta: PathBuf::from("/fasta/hs.fasta"),
            output: PathBuf::from("/proc/P1"),
            samples: vec![
                SampleGroup {
                    name: "liver".to_string(),
                    category: "default".to_string(),
                    files: vec!["/proc/P1/S1.dat".into(), "/proc/P1/S1.tandem.xml".into()],
                },
                SampleGroup {
                    name: "kidney".to_string(),
                    category: "A&B".to_string(),
                    files: vec!["/proc/P1/S2.dat".into()],
                },
            ],
        }
    }

    #[test]
    fn test_render() -> Result<()> {
        let template = "<Experiment name=\"{{name}}\" fasta=\"{{ fasta }}\" out=\"{{output}}\">\n\
                        {{#samples}}<BiologicalSample name=\"{{sample.name}}\" category=\"{{sample.category}}\">\
                        {{#files}}<InputFile>{{file}}</InputFile>{{/files}}</BiologicalSample>\n{{/samples}}\
                        </Experiment>";
        let expected = "<Experiment name=\"P1\" fasta=\"/fasta/hs.fasta\" out=\"/proc/P1/\">\n\
                        <BiologicalSample name=\"liver\" category=\"default\">\
                        <InputFile>/proc/P1/S1.dat</InputFile><InputFile>/proc/P1/S1.tandem.xml</InputFile>\
                        </BiologicalSample>\n\
                        <BiologicalSample name=\"kidney\" category=\"A&amp;B\">\
                        <InputFile>/proc/P1/S2.dat</InputFile></BiologicalSample>\n\
                        </Experiment>";
        assert_eq!(render(template, &job())?, expected);
        Ok(())
    }

    #[test]
    fn test_template_errors() {
        let job = job();
        assert!(render("{{unknown}}", &job).is_err());
        assert!(render("{{sample.name}}", &job).is_err());
        assert!(render("{{#files}}{{file}}{{/files}}", &job).is_err());
        assert!(render("{{#samples}}x", &job).is_err());
        assert!(render("{{#samples}}{{/files}}", &job).is_err());
        assert!(render("{{/samples}}", &job).is_err());
        assert!(render("{{name", &job).is_err());
    }
}
