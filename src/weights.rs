//! SafeTensors checkpoints and parameter name mapping.
//!
//! Parameters travel as a [`ParameterMap`] of raw named tensors. Native
//! checkpoints use this crate's dotted names; snapshots exported from the
//! original training setup use slash-separated link paths with 4-D conv
//! weights, which [`normalize_names`] maps onto the dotted layout.

use crate::perf::{self, Metric};
use anyhow::{bail, Context, Result};
use burn::tensor::{backend::Backend, Tensor, TensorData as BurnTensorData};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw tensor payload as stored in a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    /// Scalar dtype in the file.
    pub dtype: Dtype,
    /// Shape as a list of dimensions.
    pub shape: Vec<usize>,
    /// Raw little-endian bytes in row-major order.
    pub data: Vec<u8>,
}

impl TensorData {
    /// Copy out of a safetensors view.
    pub fn from_safetensor(tensor: TensorView<'_>) -> Self {
        Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        }
    }

    /// Encode f32 values.
    pub fn from_f32(values: &[f32], shape: Vec<usize>) -> Self {
        Self {
            dtype: Dtype::F32,
            shape,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Decode to f32 values.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        let values = match self.dtype {
            Dtype::F32 => self
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            Dtype::F64 => self
                .data
                .chunks_exact(8)
                .map(|c| {
                    let bytes = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                    f64::from_le_bytes(bytes) as f32
                })
                .collect(),
            Dtype::BF16 => self
                .data
                .chunks_exact(2)
                .map(|c| f32::from_bits(u32::from(u16::from_le_bytes([c[0], c[1]])) << 16))
                .collect(),
            other => bail!("Unsupported dtype {other:?}"),
        };
        Ok(values)
    }

    /// Shape with trailing singleton axes dropped until it has `rank` axes.
    fn shape_with_rank(&self, rank: usize) -> Option<Vec<usize>> {
        let mut shape = self.shape.clone();
        while shape.len() > rank && shape.last() == Some(&1) {
            shape.pop();
        }
        (shape.len() == rank).then_some(shape)
    }
}

/// Named raw tensors exchanged with a [`CheckpointStore`].
pub type ParameterMap = HashMap<String, TensorData>;

/// Persistent storage for model parameters.
pub trait CheckpointStore {
    /// Persist all parameters.
    fn save(&self, parameters: &ParameterMap) -> Result<()>;
    /// Read back every stored parameter under its stored name.
    fn load(&self) -> Result<ParameterMap>;
}

/// A single `.safetensors` file.
#[derive(Debug, Clone)]
pub struct SafetensorsCheckpoint {
    path: PathBuf,
}

impl SafetensorsCheckpoint {
    /// Checkpoint at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for SafetensorsCheckpoint {
    fn save(&self, parameters: &ParameterMap) -> Result<()> {
        let _span = perf::span(Metric::WeightsSave);
        let mut views: HashMap<String, TensorView<'_>> = HashMap::with_capacity(parameters.len());
        for (name, tensor) in parameters {
            let view = TensorView::new(tensor.dtype, tensor.shape.clone(), &tensor.data)
                .with_context(|| format!("invalid tensor {name}"))?;
            views.insert(name.clone(), view);
        }
        let bytes = safetensors::serialize(&views, &None)?;
        fs::write(&self.path, bytes)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        tracing::info!(
            path = %self.path.display(),
            tensors = parameters.len(),
            "saved checkpoint"
        );
        Ok(())
    }

    fn load(&self) -> Result<ParameterMap> {
        let _span = perf::span(Metric::WeightsLoad);
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let tensors = SafeTensors::deserialize(&bytes)?;
        let mut parameters = ParameterMap::new();
        for name in tensors.names() {
            let tensor = tensors.tensor(name)?;
            parameters.insert(name.to_string(), TensorData::from_safetensor(tensor));
        }
        tracing::debug!(
            path = %self.path.display(),
            tensors = parameters.len(),
            "loaded checkpoint"
        );
        Ok(parameters)
    }
}

/// Map stored names onto the crate's dotted layout, dropping unknown entries.
///
/// `n_upsample` is the number of transposed-conv stages, needed to split the
/// encoder's flat link list into stages and projections.
pub fn normalize_names(raw: ParameterMap, n_upsample: usize) -> ParameterMap {
    raw.into_iter()
        .filter_map(|(name, tensor)| match map_checkpoint_name(&name, n_upsample) {
            Some(mapped) => Some((mapped, tensor)),
            None => {
                tracing::debug!(%name, "ignoring unrecognised checkpoint entry");
                None
            }
        })
        .collect()
}

/// Map one stored parameter name, or `None` if it is not a model parameter.
pub fn map_checkpoint_name(name: &str, n_upsample: usize) -> Option<String> {
    const SNAPSHOT_PREFIXES: &[&str] = &["updater/model:main/predictor/", "predictor/", "/"];
    const LEAF_RENAME: &[(&str, &str)] = &[("W", "weight"), ("b", "bias")];
    const DECODER_RENAME: &[(&str, &str)] = &[
        ("embed", "decoder.embed"),
        ("proj1", "decoder.proj1"),
        ("proj2", "decoder.proj2"),
    ];

    if !name.contains('/') {
        return is_native_name(name).then(|| name.to_string());
    }

    let path = SNAPSHOT_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);
    let parts: Vec<&str> = path.split('/').collect();
    let (leaf, module) = parts.split_last()?;
    let leaf = map_exact(leaf, LEAF_RENAME)?;

    let module = match module {
        ["encoder", idx] => {
            let idx: usize = idx.parse().ok()?;
            if idx < n_upsample {
                format!("encoder.upsample.{idx}")
            } else {
                format!("encoder.proj.{}", idx - n_upsample)
            }
        }
        ["decoder", "resnet", layer, conv @ ("conv" | "res" | "skip")] => {
            let layer: usize = layer.parse().ok()?;
            format!("decoder.stack.{layer}.{conv}")
        }
        ["decoder", link] => map_exact(link, DECODER_RENAME)?,
        _ => return None,
    };
    Some(format!("{module}.{leaf}"))
}

fn is_native_name(name: &str) -> bool {
    const NATIVE_PREFIXES: &[&str] = &["encoder.upsample.", "encoder.proj.", "decoder."];
    NATIVE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        && (name.ends_with(".weight") || name.ends_with(".bias"))
}

/// Apply exact-match rename rules.
fn map_exact(name: &str, rules: &[(&str, &str)]) -> Option<String> {
    rules
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| (*to).to_string())
}

/// Build a rank-`D` tensor, squeezing trailing singleton axes of the payload.
pub fn tensor_from_data<B: Backend, const D: usize>(
    tensor: &TensorData,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let shape = tensor
        .shape_with_rank(D)
        .ok_or_else(|| anyhow::anyhow!("Expected {D}D tensor, got shape {:?}", tensor.shape))?;
    let values = tensor.to_f32()?;
    if values.len() != shape.iter().product::<usize>() {
        bail!(
            "Tensor payload has {} values but shape {:?}",
            values.len(),
            tensor.shape
        );
    }
    Ok(Tensor::from_data(BurnTensorData::new(values, shape), device))
}

/// Encode a tensor as f32 bytes.
pub fn tensor_to_data<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> TensorData {
    let values: Vec<f32> = tensor.to_data().iter::<f32>().collect();
    TensorData::from_f32(&values, tensor.dims().to_vec())
}
