//! Sequential - Sequential Container for Modules
//!
//! A container that runs modules in sequence, passing the output
//! of each module as input to the next. `backward` walks the chain in
//! reverse.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use zeroshard_core::Result;
use zeroshard_tensor::Tensor;

use crate::module::{prefixed, Module};
use crate::parameter::Parameter;

// =============================================================================
// Sequential
// =============================================================================

/// A sequential container that chains modules together.
///
/// # Example
/// ```rust
/// use zeroshard_nn::{Linear, Module, ReLU, Sequential};
/// use zeroshard_tensor::{seeded_rng, Tensor};
///
/// let mut rng = seeded_rng(0);
/// let mut model = Sequential::new()
///     .add(Linear::new(4, 8, &mut rng))
///     .add(ReLU::new())
///     .add(Linear::new(8, 2, &mut rng));
///
/// let output = model.forward(&Tensor::zeros(&[3, 4])).unwrap();
/// assert_eq!(output.shape(), &[3, 2]);
/// ```
pub struct Sequential {
    modules: Vec<(String, Box<dyn Module>)>,
    training: bool,
}

impl Sequential {
    /// Creates a new empty Sequential container.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            training: true,
        }
    }

    /// Adds a module with an auto-generated name.
    pub fn add<M: Module + 'static>(mut self, module: M) -> Self {
        let name = format!("{}", self.modules.len());
        self.modules.push((name, Box::new(module)));
        self
    }

    /// Adds a module with a specific name.
    pub fn add_named<M: Module + 'static>(mut self, name: impl Into<String>, module: M) -> Self {
        self.modules.push((name.into(), Box::new(module)));
        self
    }

    /// Adds an already boxed module.
    pub fn push(&mut self, name: impl Into<String>, module: Box<dyn Module>) {
        self.modules.push((name.into(), module));
    }

    /// Returns the number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if the container is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sequential {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (_, module) in &mut self.modules {
            x = module.forward(&x)?;
        }
        Ok(x)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mut grad = grad_output.clone();
        for (_, module) in self.modules.iter_mut().rev() {
            grad = module.backward(&grad)?;
        }
        Ok(grad)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.modules
            .iter()
            .flat_map(|(_, m)| m.parameters())
            .collect()
    }

    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        self.modules
            .iter()
            .flat_map(|(name, m)| prefixed(name, m.named_parameters()))
            .collect()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for (_, module) in &mut self.modules {
            module.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn name(&self) -> &'static str {
        "Sequential"
    }
}

// =============================================================================
// Tests
// =============================================================================
