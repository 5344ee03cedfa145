use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, info};

use crate::{Classifier, ClassifyError, class_from_raw};

/// Classifier backed by an external inference program.
///
/// The program is invoked as `<program> [args..] <model> <image>` and must
/// print the class id as the last non-empty line of its stdout.
#[derive(Clone, Debug)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    model: PathBuf,
}

impl CommandClassifier {
    /// Bind the classifier to `model`. The model file must exist.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        model: impl Into<PathBuf>,
    ) -> Result<Self, ClassifyError> {
        let model = model.into();
        if !model.is_file() {
            return Err(ClassifyError::MissingModel(model));
        }
        let program = program.into();
        info!(program = %program, model = %model.display(), "classifier ready");
        Ok(Self {
            program,
            args,
            model,
        })
    }
}

fn parse_class_line(stdout: &str) -> Result<i32, ClassifyError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| ClassifyError::Parse(String::new()))?;
    let raw = line
        .parse::<i64>()
        .map_err(|_| ClassifyError::Parse(line.to_string()))?;
    class_from_raw(raw)
}

impl Classifier for CommandClassifier {
    fn classify(&mut self, image: &Path) -> Result<i32, ClassifyError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.model)
            .arg(image)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ClassifyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ClassifyError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let class_id = parse_class_line(&stdout)?;
        debug!(class_id, image = %image.display(), "classified");
        Ok(class_id)
    }
}
