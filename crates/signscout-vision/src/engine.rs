use anyhow::Result;

/// Element storage of a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

/// Dense, row-major, single-batch tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    pub fn f32(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        let len = element_count(shape);
        anyhow::ensure!(values.len() == len, "shape {:?} needs {} values, got {}", shape, len, values.len());
        Ok(Self { shape: shape.to_vec(), data: TensorData::F32(values) })
    }

    pub fn u8(shape: &[usize], values: Vec<u8>) -> Result<Self> {
        let len = element_count(shape);
        anyhow::ensure!(values.len() == len, "shape {:?} needs {} values, got {}", shape, len, values.len());
        Ok(Self { shape: shape.to_vec(), data: TensorData::U8(values) })
    }

    /// Preallocated f32 output buffer for an engine to fill.
    pub fn zeros_f32(shape: &[usize]) -> Self {
        Self { shape: shape.to_vec(), data: TensorData::F32(vec![0.0; element_count(shape)]) }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len() * std::mem::size_of::<f32>(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::U8(_) => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            TensorData::F32(v) => Some(v),
            TensorData::U8(_) => None,
        }
    }
}

fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Synchronous model executor.
///
/// Implementations receive exactly one input tensor and fill the
/// caller-preallocated `outputs` in place, keeping their declared shapes.
/// Calls are not required to be reentrant, hence `&mut self`; callers that
/// share an engine across threads serialise access with a lock.
pub trait InferenceEngine: Send {
    fn run(&mut self, input: &Tensor, outputs: &mut [Tensor]) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "engine"
    }
}
