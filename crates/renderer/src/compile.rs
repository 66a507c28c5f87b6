use std::fmt;

use crate::schema::Schema;

/// Name of the generated uniform struct every shader binds at group 0, binding 0.
pub const UNIFORM_STRUCT: &str = "Uniforms";

pub const COMPUTE_ENTRY: &str = "computeMain";
pub const VERTEX_ENTRY: &str = "vertexMain";
pub const FRAGMENT_ENTRY: &str = "fragmentMain";

const RAYMARCH_COMPUTE: &str = include_str!("../shaders/raymarch.wgsl");
const PRESENT_RENDER: &str = include_str!("../shaders/present.wgsl");

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Where a diagnostic points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticOrigin {
    /// The user SDF text; line numbers are relative to it.
    UserSource,
    /// The infrastructure compute shader or generated prelude.
    BaseShader,
    RenderShader,
    /// Schema layout checks, not tied to shader text.
    Layout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderDiagnostic {
    pub severity: Severity,
    pub message: String,
    pub origin: DiagnosticOrigin,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ShaderDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        let scope = match self.origin {
            DiagnosticOrigin::UserSource => "sdf",
            DiagnosticOrigin::BaseShader => "base shader",
            DiagnosticOrigin::RenderShader => "render shader",
            DiagnosticOrigin::Layout => return Ok(()),
        };
        match self.location {
            Some(location) => write!(f, " ({scope} {}:{})", location.line, location.column),
            None => write!(f, " ({scope})"),
        }
    }
}

/// Ordered diagnostics from one build attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderDiagnostics {
    entries: Vec<ShaderDiagnostic>,
}

impl ShaderDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(severity: Severity, origin: DiagnosticOrigin, message: impl Into<String>) -> Self {
        let mut diagnostics = Self::new();
        diagnostics.push(ShaderDiagnostic {
            severity,
            message: message.into(),
            origin,
            location: None,
        });
        diagnostics
    }

    pub fn push(&mut self, diagnostic: ShaderDiagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: ShaderDiagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShaderDiagnostic> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.severity == severity)
            .count()
    }
}

impl fmt::Display for ShaderDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Infrastructure shaders the user SDF is composed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSources {
    /// Compute stage; the user source is appended to it.
    pub compute: String,
    /// Vertex + fragment stages presenting the color buffer.
    pub render: String,
}

impl ShaderSources {
    /// The bundled progressive raymarcher.
    pub fn raymarcher() -> Self {
        Self {
            compute: RAYMARCH_COMPUTE.to_string(),
            render: PRESENT_RENDER.to_string(),
        }
    }
}

/// Values baked into the generated prelude as WGSL constants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShaderConstants {
    pub workgroup: [u32; 2],
    /// Exposure for the `1 - exp(-c * exposure)` curve; `None` presents raw values.
    pub exposure: Option<f32>,
}

impl Default for ShaderConstants {
    fn default() -> Self {
        Self {
            workgroup: [16, 16],
            exposure: None,
        }
    }
}

/// Fully composed WGSL ready for pipeline creation.
#[derive(Clone, Debug)]
pub struct ComposedShader {
    pub compute: String,
    pub render: String,
    /// Lines in `compute` that precede the user source.
    pub user_line_offset: u32,
    pub warnings: ShaderDiagnostics,
}

impl ComposedShader {
    /// Maps a line/column in the composed compute source back to its origin.
    pub fn locate_compute(&self, line: u32, column: u32) -> (DiagnosticOrigin, SourceLocation) {
        if line > self.user_line_offset {
            (
                DiagnosticOrigin::UserSource,
                SourceLocation {
                    line: line - self.user_line_offset,
                    column,
                },
            )
        } else {
            (DiagnosticOrigin::BaseShader, SourceLocation { line, column })
        }
    }
}

fn prelude(schema: &Schema, constants: &ShaderConstants) -> String {
    let exposure = constants.exposure.unwrap_or(0.0);
    format!(
        "{}\nconst WORKGROUP_X: u32 = {}u;\nconst WORKGROUP_Y: u32 = {}u;\nconst EXPOSURE: f32 = {:?};\n\n",
        schema.wgsl_struct(UNIFORM_STRUCT),
        constants.workgroup[0].max(1),
        constants.workgroup[1].max(1),
        exposure,
    )
}

/// Composes `prelude + base compute + "\n" + user source` and the render
/// shader, then parses and validates both with naga.
///
/// On failure the diagnostics contain at least one [`Severity::Error`]. A
/// schema field whose packed offset breaks WGSL uniform alignment is an
/// error: the generated struct would read it from a different offset than
/// [`crate::schema::pack`] writes it.
pub fn compose(
    schema: &Schema,
    sources: &ShaderSources,
    constants: &ShaderConstants,
    user_source: &str,
) -> Result<ComposedShader, ShaderDiagnostics> {
    let prelude = prelude(schema, constants);
    let prefix = format!("{prelude}{}\n", sources.compute);
    let user_line_offset = prefix.matches('\n').count() as u32;
    let compute = format!("{prefix}{user_source}");
    let render = format!("{prelude}{}", sources.render);

    let mut composed = ComposedShader {
        compute,
        render,
        user_line_offset,
        warnings: ShaderDiagnostics::new(),
    };

    let mut diagnostics = ShaderDiagnostics::new();
    for issue in schema.alignment_issues() {
        diagnostics.push(ShaderDiagnostic {
            severity: Severity::Error,
            message: issue.to_string(),
            origin: DiagnosticOrigin::Layout,
            location: None,
        });
    }

    if let Err(errors) = validate_wgsl(&composed.compute) {
        for (message, location) in errors {
            let (origin, location) = match location {
                Some(location) => {
                    let (origin, mapped) = composed.locate_compute(location.line, location.column);
                    (origin, Some(mapped))
                }
                None => (DiagnosticOrigin::BaseShader, None),
            };
            diagnostics.push(ShaderDiagnostic {
                severity: Severity::Error,
                message,
                origin,
                location,
            });
        }
    }

    if let Err(errors) = validate_wgsl(&composed.render) {
        for (message, location) in errors {
            diagnostics.push(ShaderDiagnostic {
                severity: Severity::Error,
                message,
                origin: DiagnosticOrigin::RenderShader,
                location,
            });
        }
    }

    if diagnostics.has_errors() {
        return Err(diagnostics);
    }
    composed.warnings = diagnostics;
    Ok(composed)
}

type ValidationErrors = Vec<(String, Option<SourceLocation>)>;

fn validate_wgsl(source: &str) -> Result<(), ValidationErrors> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| {
        let location = err.location(source).map(|loc| SourceLocation {
            line: loc.line_number,
            column: loc.line_position,
        });
        vec![(err.message().to_string(), location)]
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|err| {
        let location = err.location(source).map(|loc| SourceLocation {
            line: loc.line_number,
            column: loc.line_position,
        });
        vec![(err.as_inner().to_string(), location)]
    })?;
    Ok(())
}
