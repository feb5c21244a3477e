//! Elman recurrent cell with backpropagation through time.
//!
//! The encoder only consumes the final hidden state of each pass, so the
//! backward path here starts from a gradient on that last state and walks
//! the sequence in reverse.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{outer, Module};

/// Forward-pass record for [`Rnn::backward_from_last`].
#[derive(Debug, Clone)]
pub struct RnnCache {
    /// Hidden state before the first step of this pass
    pub h0: Array1<f64>,
    /// Inputs in presentation order
    pub inputs: Vec<Array1<f64>>,
    /// Post-activation hidden states, one per step
    pub hiddens: Vec<Array1<f64>>,
}

/// Single-layer recurrent cell: `h_t = tanh(W_ih x_t + W_hh h_{t-1} + b)`.
///
/// The cell keeps its running hidden state internally; call [`Rnn::reset`]
/// between independent sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rnn {
    pub w_ih: Array2<f64>,
    pub w_hh: Array2<f64>,
    pub bias: Array1<f64>,

    input_size: usize,
    hidden_size: usize,

    #[serde(skip)]
    state: Array1<f64>,
    #[serde(skip)]
    grad_w_ih: Array2<f64>,
    #[serde(skip)]
    grad_w_hh: Array2<f64>,
    #[serde(skip)]
    grad_bias: Array1<f64>,
}

impl Rnn {
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let dist = Uniform::new(-limit, limit);
        Self {
            w_ih: Array2::random_using((hidden_size, input_size), dist, rng),
            w_hh: Array2::random_using((hidden_size, hidden_size), dist, rng),
            bias: Array1::zeros(hidden_size),
            input_size,
            hidden_size,
            state: Array1::zeros(hidden_size),
            grad_w_ih: Array2::zeros((hidden_size, input_size)),
            grad_w_hh: Array2::zeros((hidden_size, hidden_size)),
            grad_bias: Array1::zeros(hidden_size),
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Reset the running hidden state to zero.
    pub fn reset(&mut self) {
        // Reallocation also restores the shape after deserialization.
        self.state = Array1::zeros(self.hidden_size);
    }

    /// Feed a whole sequence (in the order given) and return the final
    /// hidden state together with the cache for the backward pass.
    pub fn run(&mut self, inputs: &[Array1<f64>]) -> (Array1<f64>, RnnCache) {
        let h0 = self.state.clone();
        let mut hiddens = Vec::with_capacity(inputs.len());

        for x in inputs {
            let pre = self.w_ih.dot(x) + self.w_hh.dot(&self.state) + &self.bias;
            self.state = pre.mapv(f64::tanh);
            hiddens.push(self.state.clone());
        }

        (
            self.state.clone(),
            RnnCache {
                h0,
                inputs: inputs.to_vec(),
                hiddens,
            },
        )
    }

    /// Backpropagate through time from a gradient on the final hidden
    /// state. Accumulates weight gradients and returns the gradients with
    /// respect to the inputs, in presentation order.
    pub fn backward_from_last(
        &mut self,
        cache: &RnnCache,
        grad_last: &Array1<f64>,
    ) -> Vec<Array1<f64>> {
        let steps = cache.inputs.len();
        let mut grad_inputs = vec![Array1::zeros(self.input_size); steps];
        let mut dh = grad_last.clone();

        for t in (0..steps).rev() {
            let h = &cache.hiddens[t];
            // d/dpre tanh(pre) = 1 - h^2
            let dpre = &dh * &h.mapv(|v| 1.0 - v * v);

            let h_prev = if t == 0 { &cache.h0 } else { &cache.hiddens[t - 1] };
            self.grad_w_ih += &outer(&dpre, &cache.inputs[t]);
            self.grad_w_hh += &outer(&dpre, h_prev);
            self.grad_bias += &dpre;

            grad_inputs[t] = self.w_ih.t().dot(&dpre);
            dh = self.w_hh.t().dot(&dpre);
        }

        grad_inputs
    }
}

impl Module for Rnn {
    fn num_params(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.bias.len()
    }

    fn write_params(&self, out: &mut Vec<f64>) {
        out.extend(self.w_ih.iter());
        out.extend(self.w_hh.iter());
        out.extend(self.bias.iter());
    }

    fn read_params(&mut self, src: &[f64], offset: &mut usize) {
        for w in self.w_ih.iter_mut().chain(self.w_hh.iter_mut()) {
            *w = src[*offset];
            *offset += 1;
        }
        for b in self.bias.iter_mut() {
            *b = src[*offset];
            *offset += 1;
        }
    }

    fn write_grads(&self, out: &mut Vec<f64>) {
        out.extend(self.grad_w_ih.iter());
        out.extend(self.grad_w_hh.iter());
        out.extend(self.grad_bias.iter());
    }

    fn zero_grad(&mut self) {
        self.grad_w_ih = Array2::zeros((self.hidden_size, self.input_size));
        self.grad_w_hh = Array2::zeros((self.hidden_size, self.hidden_size));
        self.grad_bias = Array1::zeros(self.hidden_size);
    }
}
