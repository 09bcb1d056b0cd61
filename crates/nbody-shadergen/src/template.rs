//! Two-pass template preprocessor: [`ShaderTemplate::parse`] classifies lines,
//! [`ShaderTemplate::expand`] emits one variant.

use std::path::{Path, PathBuf};

/// Replaced by the variant's group size
pub const SIZE_MARKER: &str = "/*SIZE*/";
/// Opens a replicated block; must be followed by a parenthesised body
pub const REPEAT_MARKER: &str = "/*REPEAT";
/// Replaced by the replication index inside a repeat body
pub const ID_PLACEHOLDER: &str = "#ID#";
/// Variant 15 already replicates a repeat body 32768 times
pub const MAX_VARIANTS: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read shader template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: REPEAT directive is not followed by `(`")]
    MissingParen { line: usize },
    #[error("line {line}: REPEAT directive body is never closed")]
    Unbalanced { line: usize },
    #[error("variant {requested} requested, at most {MAX_VARIANTS} are supported")]
    TooManyVariants { requested: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateLine {
    Verbatim(String),
    Size { before: String, after: String },
    Repeat { indent: String, body: String },
}

/// A parsed template, ready to be expanded any number of times
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderTemplate {
    lines: Vec<TemplateLine>,
}

impl ShaderTemplate {
    /// First pass: find directives and split them out of their lines
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let lines = source
            .lines()
            .enumerate()
            .map(|(index, line)| classify(line, index + 1))
            .collect::<Result<Vec<_>, _>>()?;

        let directives = lines
            .iter()
            .filter(|l| !matches!(l, TemplateLine::Verbatim(_)))
            .count();
        log::debug!(
            "Parsed shader template: {} lines, {} directives",
            lines.len(),
            directives
        );

        Ok(Self { lines })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    /// Work-group size of variant `variant`
    pub fn group_size(variant: u32) -> u32 {
        1 << variant
    }

    /// Second pass: emit the source of variant `variant`
    pub fn expand(&self, variant: u32) -> Result<String, TemplateError> {
        if variant >= MAX_VARIANTS {
            return Err(TemplateError::TooManyVariants { requested: variant });
        }
        let size = Self::group_size(variant);

        let mut out = String::new();
        for line in &self.lines {
            match line {
                TemplateLine::Verbatim(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                TemplateLine::Size { before, after } => {
                    out.push_str(before);
                    out.push_str(&size.to_string());
                    out.push_str(after);
                    out.push('\n');
                }
                TemplateLine::Repeat { indent, body } => {
                    for id in 0..size {
                        out.push_str(indent);
                        out.push_str(&body.replace(ID_PLACEHOLDER, &id.to_string()));
                        out.push('\n');
                    }
                }
            }
        }
        Ok(out)
    }

    /// Variants `0..count`, in order
    pub fn variants(&self, count: u32) -> Result<Vec<String>, TemplateError> {
        if count > MAX_VARIANTS {
            return Err(TemplateError::TooManyVariants { requested: count - 1 });
        }
        (0..count).map(|i| self.expand(i)).collect()
    }
}

/// Read `path` and expand `count` variants. On any failure no variant is
/// produced.
pub fn generate_variants(path: impl AsRef<Path>, count: u32) -> Result<Vec<String>, TemplateError> {
    let path = path.as_ref();
    let variants = ShaderTemplate::from_file(path)
        .and_then(|template| template.variants(count))
        .inspect_err(|e| log::error!("Shader generation failed: {e}"))?;
    log::info!("Generated {} kernel variants from {}", variants.len(), path.display());
    Ok(variants)
}

fn classify(line: &str, line_number: usize) -> Result<TemplateLine, TemplateError> {
    if let Some(pos) = line.find(SIZE_MARKER) {
        return Ok(TemplateLine::Size {
            before: line[..pos].to_string(),
            after: line[pos + SIZE_MARKER.len()..].to_string(),
        });
    }

    if let Some(pos) = line.find(REPEAT_MARKER) {
        let rest = line[pos + REPEAT_MARKER.len()..].trim_start();
        let Some(inner) = rest.strip_prefix('(') else {
            return Err(TemplateError::MissingParen { line: line_number });
        };
        let body = balanced_body(inner).ok_or(TemplateError::Unbalanced { line: line_number })?;
        return Ok(TemplateLine::Repeat {
            indent: line[..pos].to_string(),
            body: body.to_string(),
        });
    }

    Ok(TemplateLine::Verbatim(line.to_string()))
}

/// Text up to the `)` closing an already-consumed `(`. Nested pairs inside the
/// body are kept.
fn balanced_body(text: &str) -> Option<&str> {
    let mut depth = 1usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i]);
                }
            }
            _ => {}
        }
    }
    None
}
