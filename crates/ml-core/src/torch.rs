use std::path::Path;

use tch::{self, Device, Kind, Tensor};
use tracing::info;

use crate::{
    Classifier, ClassifyError, class_from_raw,
    preprocess::{INPUT_EDGE_PIXELS, load_normalized},
};

/// TorchScript-backed image classifier.
pub struct TorchClassifier {
    module: tch::CModule,
    device: Device,
}

impl TorchClassifier {
    /// Load a TorchScript module onto `device`.
    pub fn load<P: AsRef<Path>>(model_path: P, device: Device) -> Result<Self, ClassifyError> {
        let path = model_path.as_ref();
        if !path.is_file() {
            return Err(ClassifyError::MissingModel(path.to_path_buf()));
        }
        let mut module =
            tch::CModule::load_on_device(path, device).map_err(|err| ClassifyError::Load {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        module.set_eval();
        info!(model = %path.display(), ?device, "torchscript classifier loaded");
        Ok(Self { module, device })
    }

    fn input_tensor(&self, image: &Path) -> Result<Tensor, ClassifyError> {
        let edge = i64::from(INPUT_EDGE_PIXELS);
        let data = load_normalized(image, INPUT_EDGE_PIXELS)?;
        Ok(Tensor::from_slice(&data)
            .to_device(self.device)
            .view([1, 3, edge, edge]))
    }
}

impl Classifier for TorchClassifier {
    fn classify(&mut self, image: &Path) -> Result<i32, ClassifyError> {
        let input = self.input_tensor(image)?;
        let logits = tch::no_grad(|| self.module.forward_ts(&[input]))
            .map_err(|err| ClassifyError::Inference(err.to_string()))?;
        let shape = logits.size();
        if shape.len() != 2 || shape[0] != 1 {
            return Err(ClassifyError::Inference(format!(
                "unexpected output shape {shape:?}"
            )));
        }
        let class_id = logits
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .argmax(-1, false)
            .int64_value(&[0]);
        class_from_raw(class_id)
    }
}
