//! Symmetric dense autoencoder trained with Adam on mean squared error
//!
//! Encoder: `input → [Dense(h) → ReLU → BatchNorm]* → Dense(encoding_dim)`.
//! The decoder mirrors the hidden widths back to the input width and ends in
//! a linear layer. The bottleneck is linear so latent codes never collapse to
//! dead ReLU zeros before k-means sees them.

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-7;
const BN_MOMENTUM: f64 = 0.9;
const BN_EPS: f64 = 1e-3;

/// Trainable encoder/decoder pair
#[derive(Debug, Clone)]
pub struct Autoencoder {
    encoder: Vec<Layer>,
    decoder: Vec<Layer>,
    input_dim: usize,
    encoding_dim: usize,
    step: i32,
}

impl Autoencoder {
    /// Build with Glorot-uniform weights drawn from `rng`
    pub fn new(input_dim: usize, hidden: &[usize], encoding_dim: usize, rng: &mut StdRng) -> Self {
        let mut encoder = Vec::new();
        let mut width = input_dim;
        for &h in hidden {
            encoder.push(Layer::Dense(Dense::new(width, h, rng)));
            encoder.push(Layer::Relu(Relu::default()));
            encoder.push(Layer::BatchNorm(BatchNorm::new(h)));
            width = h;
        }
        encoder.push(Layer::Dense(Dense::new(width, encoding_dim, rng)));

        let mut decoder = Vec::new();
        width = encoding_dim;
        for &h in hidden.iter().rev() {
            decoder.push(Layer::Dense(Dense::new(width, h, rng)));
            decoder.push(Layer::Relu(Relu::default()));
            decoder.push(Layer::BatchNorm(BatchNorm::new(h)));
            width = h;
        }
        decoder.push(Layer::Dense(Dense::new(width, input_dim, rng)));

        Self {
            encoder,
            decoder,
            input_dim,
            encoding_dim,
            step: 0,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn encoding_dim(&self) -> usize {
        self.encoding_dim
    }

    /// Train for `epochs` passes over shuffled mini-batches
    ///
    /// Returns the mean training loss of each epoch.
    pub fn fit(
        &mut self,
        data: &Array2<f64>,
        epochs: usize,
        batch_size: usize,
        learning_rate: f64,
        rng: &mut StdRng,
    ) -> Vec<f64> {
        let n_samples = data.nrows();
        let mut order: Vec<usize> = (0..n_samples).collect();
        let mut history = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;
            for batch_rows in order.chunks(batch_size.max(1)) {
                let batch = data.select(Axis(0), batch_rows);
                let loss = self.train_batch(&batch, learning_rate);
                epoch_loss += loss * batch_rows.len() as f64;
            }
            let mean_loss = epoch_loss / n_samples.max(1) as f64;
            log::debug!("Autoencoder epoch {}/{}: loss {:.6}", epoch + 1, epochs, mean_loss);
            history.push(mean_loss);
        }
        history
    }

    /// Latent codes (n_samples, encoding_dim), inference mode
    pub fn encode(&self, data: &Array2<f64>) -> Array2<f64> {
        infer(&self.encoder, data)
    }

    /// Decoder output for latent codes, inference mode
    pub fn decode(&self, codes: &Array2<f64>) -> Array2<f64> {
        infer(&self.decoder, codes)
    }

    pub fn reconstruct(&self, data: &Array2<f64>) -> Array2<f64> {
        self.decode(&self.encode(data))
    }

    /// Mean squared error over every element of `data`
    pub fn reconstruction_error(&self, data: &Array2<f64>) -> f64 {
        let reconstructed = self.reconstruct(data);
        mean_squared_error(&reconstructed, data)
    }

    fn train_batch(&mut self, batch: &Array2<f64>, learning_rate: f64) -> f64 {
        let mut activation = batch.clone();
        for layer in self.encoder.iter_mut().chain(self.decoder.iter_mut()) {
            activation = layer.forward(&activation);
        }
        let loss = mean_squared_error(&activation, batch);

        let scale = 2.0 / activation.len() as f64;
        let mut grad = (&activation - batch) * scale;
        for layer in self.decoder.iter_mut().rev().chain(self.encoder.iter_mut().rev()) {
            grad = layer.backward(&grad);
        }

        self.step += 1;
        for layer in self.encoder.iter_mut().chain(self.decoder.iter_mut()) {
            layer.apply_adam(learning_rate, self.step);
        }
        loss
    }
}

fn infer(layers: &[Layer], input: &Array2<f64>) -> Array2<f64> {
    layers
        .iter()
        .fold(input.clone(), |activation, layer| layer.infer(&activation))
}

fn mean_squared_error(prediction: &Array2<f64>, target: &Array2<f64>) -> f64 {
    let n = prediction.len().max(1) as f64;
    (prediction - target).iter().map(|d| d * d).sum::<f64>() / n
}

#[derive(Debug, Clone)]
enum Layer {
    Dense(Dense),
    Relu(Relu),
    BatchNorm(BatchNorm),
}

impl Layer {
    /// Training-mode forward pass, caching what backward needs
    fn forward(&mut self, input: &Array2<f64>) -> Array2<f64> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::Relu(l) => l.forward(input),
            Layer::BatchNorm(l) => l.forward(input),
        }
    }

    fn infer(&self, input: &Array2<f64>) -> Array2<f64> {
        match self {
            Layer::Dense(l) => l.infer(input),
            Layer::Relu(_) => input.mapv(|v| v.max(0.0)),
            Layer::BatchNorm(l) => l.infer(input),
        }
    }

    fn backward(&mut self, grad: &Array2<f64>) -> Array2<f64> {
        match self {
            Layer::Dense(l) => l.backward(grad),
            Layer::Relu(l) => l.backward(grad),
            Layer::BatchNorm(l) => l.backward(grad),
        }
    }

    fn apply_adam(&mut self, learning_rate: f64, step: i32) {
        match self {
            Layer::Dense(l) => {
                l.weights.update(learning_rate, step);
                l.bias.update(learning_rate, step);
            }
            Layer::BatchNorm(l) => {
                l.gamma.update(learning_rate, step);
                l.beta.update(learning_rate, step);
            }
            Layer::Relu(_) => {}
        }
    }
}

/// Parameter tensor with its gradient and Adam moments
#[derive(Debug, Clone)]
struct Param<D: ndarray::Dimension> {
    value: ndarray::Array<f64, D>,
    grad: ndarray::Array<f64, D>,
    m: ndarray::Array<f64, D>,
    v: ndarray::Array<f64, D>,
}

impl<D: ndarray::Dimension> Param<D> {
    fn new(value: ndarray::Array<f64, D>) -> Self {
        let zeros = ndarray::Array::zeros(value.raw_dim());
        Self {
            grad: zeros.clone(),
            m: zeros.clone(),
            v: zeros,
            value,
        }
    }

    fn update(&mut self, learning_rate: f64, step: i32) {
        let bias1 = 1.0 - ADAM_BETA1.powi(step);
        let bias2 = 1.0 - ADAM_BETA2.powi(step);
        ndarray::Zip::from(&mut self.value)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(&self.grad)
            .for_each(|w, m, v, &g| {
                *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *w -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPS);
            });
    }
}

#[derive(Debug, Clone)]
struct Dense {
    weights: Param<ndarray::Ix2>,
    bias: Param<ndarray::Ix1>,
    input: Array2<f64>,
}

impl Dense {
    fn new(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
        let weights = Array2::random_using((fan_in, fan_out), Uniform::new(-limit, limit), rng);
        Self {
            weights: Param::new(weights),
            bias: Param::new(Array1::zeros(fan_out)),
            input: Array2::zeros((0, fan_in)),
        }
    }

    fn forward(&mut self, input: &Array2<f64>) -> Array2<f64> {
        self.input = input.clone();
        self.infer(input)
    }

    fn infer(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights.value) + &self.bias.value
    }

    fn backward(&mut self, grad: &Array2<f64>) -> Array2<f64> {
        self.weights.grad = self.input.t().dot(grad);
        self.bias.grad = grad.sum_axis(Axis(0));
        grad.dot(&self.weights.value.t())
    }
}

#[derive(Debug, Clone, Default)]
struct Relu {
    input: Array2<f64>,
}

impl Relu {
    fn forward(&mut self, input: &Array2<f64>) -> Array2<f64> {
        self.input = input.clone();
        input.mapv(|v| v.max(0.0))
    }

    fn backward(&mut self, grad: &Array2<f64>) -> Array2<f64> {
        let mut out = grad.clone();
        ndarray::Zip::from(&mut out)
            .and(&self.input)
            .for_each(|g, &x| {
                if x <= 0.0 {
                    *g = 0.0;
                }
            });
        out
    }
}

#[derive(Debug, Clone)]
struct BatchNorm {
    gamma: Param<ndarray::Ix1>,
    beta: Param<ndarray::Ix1>,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    normalized: Array2<f64>,
    inv_std: Array1<f64>,
}

impl BatchNorm {
    fn new(width: usize) -> Self {
        Self {
            gamma: Param::new(Array1::ones(width)),
            beta: Param::new(Array1::zeros(width)),
            running_mean: Array1::zeros(width),
            running_var: Array1::ones(width),
            normalized: Array2::zeros((0, width)),
            inv_std: Array1::ones(width),
        }
    }

    fn forward(&mut self, input: &Array2<f64>) -> Array2<f64> {
        let width = input.ncols();
        let mean = input
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(width));
        let var = input.var_axis(Axis(0), 0.0);

        self.running_mean = &self.running_mean * BN_MOMENTUM + &mean * (1.0 - BN_MOMENTUM);
        self.running_var = &self.running_var * BN_MOMENTUM + &var * (1.0 - BN_MOMENTUM);

        self.inv_std = var.mapv(|v| 1.0 / (v + BN_EPS).sqrt());
        self.normalized = (input - &mean) * &self.inv_std;
        &self.normalized * &self.gamma.value + &self.beta.value
    }

    fn infer(&self, input: &Array2<f64>) -> Array2<f64> {
        let inv_std = self.running_var.mapv(|v| 1.0 / (v + BN_EPS).sqrt());
        (input - &self.running_mean) * &inv_std * &self.gamma.value + &self.beta.value
    }

    fn backward(&mut self, grad: &Array2<f64>) -> Array2<f64> {
        let n = grad.nrows() as f64;
        self.gamma.grad = (grad * &self.normalized).sum_axis(Axis(0));
        self.beta.grad = grad.sum_axis(Axis(0));

        let grad_norm = grad * &self.gamma.value;
        let sum_grad = grad_norm.sum_axis(Axis(0));
        let sum_grad_x = (&grad_norm * &self.normalized).sum_axis(Axis(0));

        let centered = &grad_norm * n - &sum_grad - &self.normalized * &sum_grad_x;
        centered * &self.inv_std / n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn toy_data(rng: &mut StdRng) -> Array2<f64> {
        use ndarray_rand::rand_distr::Normal;
        let latent = Array2::random_using((64, 2), Normal::new(0.0, 1.0).unwrap(), rng);
        let mixing = ndarray::array![
            [1.0, 0.5, -0.3, 0.8, 0.0],
            [0.2, -1.0, 0.7, 0.1, 0.9]
        ];
        latent.dot(&mixing)
    }

    #[test]
    fn test_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = Autoencoder::new(5, &[8, 4], 2, &mut rng);
        let data = Array2::zeros((3, 5));
        assert_eq!(model.encode(&data).dim(), (3, 2));
        assert_eq!(model.reconstruct(&data).dim(), (3, 5));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = toy_data(&mut rng);
        let mut model = Autoencoder::new(5, &[16, 8], 2, &mut rng);
        let before = model.reconstruction_error(&data);
        let history = model.fit(&data, 150, 16, 5e-3, &mut rng);
        let after = model.reconstruction_error(&data);

        assert_eq!(history.len(), 150);
        assert!(history.last().unwrap() < &history[0], "{history:?}");
        assert!(after < before, "before {before} after {after}");
    }

    #[test]
    fn test_dense_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut layer = Dense::new(3, 2, &mut rng);
        let input = ndarray::array![[0.5, -1.0, 2.0], [1.5, 0.3, -0.7]];

        // Loss = sum of outputs, so the upstream gradient is all ones
        let out = layer.forward(&input);
        layer.backward(&Array2::ones(out.raw_dim()));
        let analytic = layer.weights.grad[[1, 0]];

        let h = 1e-6;
        let mut bumped = layer.clone();
        bumped.weights.value[[1, 0]] += h;
        let numeric = (bumped.infer(&input).sum() - layer.infer(&input).sum()) / h;
        assert!((analytic - numeric).abs() < 1e-4);
    }

    #[test]
    fn test_batch_norm_normalizes_in_training() {
        let mut layer = BatchNorm::new(2);
        let input = ndarray::array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0]];
        let out = layer.forward(&input);
        for column in out.axis_iter(Axis(1)) {
            assert!(column.mean().unwrap().abs() < 1e-9);
        }
        assert!(layer.running_mean[1] > 0.0);
    }
}
