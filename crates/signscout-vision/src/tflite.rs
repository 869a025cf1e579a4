use anyhow::Result;
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}};
use tracing::info;

use crate::engine::{InferenceEngine, Tensor, TensorData};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;

    fn TfLiteTensorCopyFromBuffer(tensor: *mut TfLiteTensor, input_data: *const c_void, input_data_size: usize) -> c_int;
    fn TfLiteTensorCopyToBuffer(tensor: *const TfLiteTensor, output_data: *mut c_void, output_data_size: usize) -> c_int;
}

/// One TFLite interpreter over a model file, usable as either stage's engine.
pub struct TfliteEngine {
    name: String,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
}

// The interpreter is only touched through `&mut self`, and stages keep it
// behind a mutex.
unsafe impl Send for TfliteEngine {}

impl TfliteEngine {
    pub fn new(model_path: &str, threads: i32) -> Result<Self> {
        let cpath = CString::new(model_path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if opts.is_null() {
            unsafe { TfLiteModelDelete(model) };
            anyhow::bail!("failed to create tflite options");
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, threads) };

        // from here on Drop releases whatever was created
        let mut engine = Self { name: model_path.to_string(), model, opts, interp: std::ptr::null_mut() };

        engine.interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!engine.interp.is_null(), "failed to create tflite interpreter for {}", model_path);

        let rc = unsafe { TfLiteInterpreterAllocateTensors(engine.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed for {}", model_path);

        info!("vision: loaded TFLite model: {} ({} threads)", model_path, threads);
        Ok(engine)
    }

    pub fn inspect(&mut self) -> Result<String> {
        let (n_in, n_out) = unsafe {
            (
                TfLiteInterpreterGetInputTensorCount(self.interp),
                TfLiteInterpreterGetOutputTensorCount(self.interp),
            )
        };
        let mut s = format!("TFLite inspect: {}\n", self.name);
        for i in 0..n_in {
            let t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, i) };
            anyhow::ensure!(!t.is_null(), "no input tensor {}", i);
            let bytes = unsafe { TfLiteTensorByteSize(t) };
            s.push_str(&format!("- input[{}] dims={:?} bytes={}\n", i, tensor_dims(t), bytes));
        }
        for i in 0..n_out {
            let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, i) };
            anyhow::ensure!(!t.is_null(), "no output tensor {}", i);
            let bytes = unsafe { TfLiteTensorByteSize(t) };
            s.push_str(&format!("- output[{}] dims={:?} bytes={}\n", i, tensor_dims(t), bytes));
        }
        Ok(s)
    }
}

impl InferenceEngine for TfliteEngine {
    fn run(&mut self, input: &Tensor, outputs: &mut [Tensor]) -> Result<()> {
        let in_t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!in_t.is_null(), "no input tensor");

        let need = unsafe { TfLiteTensorByteSize(in_t) };
        anyhow::ensure!(
            input.byte_len() == need,
            "input size mismatch: model wants {} bytes, got {} (dims {:?})",
            need,
            input.byte_len(),
            tensor_dims(in_t)
        );
        let src: *const c_void = match input.data() {
            TensorData::F32(v) => v.as_ptr().cast(),
            TensorData::U8(v) => v.as_ptr().cast(),
        };
        let rc = unsafe { TfLiteTensorCopyFromBuffer(in_t, src, need) };
        anyhow::ensure!(rc == 0, "TfLiteTensorCopyFromBuffer failed");

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        for (i, out) in outputs.iter_mut().enumerate() {
            let out_t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, i as c_int) };
            anyhow::ensure!(!out_t.is_null(), "no output tensor {}", i);

            let dims = tensor_dims(out_t);
            let elems: usize = dims.iter().map(|d| *d as usize).product();
            anyhow::ensure!(
                elems == out.len(),
                "output[{}] dims {:?} do not match expected shape {:?}",
                i,
                dims,
                out.shape()
            );

            let bytes = out.byte_len();
            let have = unsafe { TfLiteTensorByteSize(out_t) };
            anyhow::ensure!(have == bytes, "output[{}] is {} bytes, buffer is {}", i, have, bytes);

            let dst: *mut c_void = match out.data_mut() {
                TensorData::F32(v) => v.as_mut_ptr().cast(),
                TensorData::U8(v) => v.as_mut_ptr().cast(),
            };
            let rc = unsafe { TfLiteTensorCopyToBuffer(out_t, dst, bytes) };
            anyhow::ensure!(rc == 0, "TfLiteTensorCopyToBuffer failed for output[{}]", i);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd.max(0) as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for TfliteEngine {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}
