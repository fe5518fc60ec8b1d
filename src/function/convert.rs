pub use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

/// Moving a float tensor to a flat host buffer, row-major.
pub fn to_host_f32<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .expect("The tensor data should convert to f32")
}

/// Moving an int tensor to a flat host buffer, row-major.
pub fn to_host_i64<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>
) -> Vec<i64> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec()
        .expect("The tensor data should convert to i64")
}

/// Building a float tensor from a flat host buffer, row-major.
pub fn from_host_f32<B: Backend, const D: usize>(
    values: Vec<f32>,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(
        TensorData::new(values, dims).convert::<B::FloatElem>(),
        device,
    )
}

/// Building an int tensor from a flat host buffer, row-major.
pub fn from_host_i64<B: Backend, const D: usize>(
    values: Vec<i64>,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    Tensor::from_data(
        TensorData::new(values, dims).convert::<B::IntElem>(),
        device,
    )
}
