//! Canonical kernel name constants.
//!
//! Kernels and gradients are looked up purely by these strings, never by
//! direct reference, so backends can swap implementations per name.

pub const IDENTITY: &str = "Identity";
pub const CAST: &str = "Cast";
pub const FILL: &str = "Fill";
pub const ZEROS_LIKE: &str = "ZerosLike";
pub const ONES_LIKE: &str = "OnesLike";

pub const ADD: &str = "Add";
pub const SUB: &str = "Sub";
pub const MULTIPLY: &str = "Multiply";
pub const REAL_DIV: &str = "RealDiv";

pub const NEG: &str = "Neg";
pub const SQUARE: &str = "Square";
pub const SQRT: &str = "Sqrt";
pub const EXP: &str = "Exp";
pub const LOG: &str = "Log";
pub const RELU: &str = "Relu";
pub const ABS: &str = "Abs";
pub const STEP: &str = "Step";
pub const SIGN: &str = "Sign";

pub const SUM: &str = "Sum";
pub const MEAN: &str = "Mean";

pub const MAT_MUL: &str = "MatMul";
pub const TRANSPOSE: &str = "Transpose";
pub const RESHAPE: &str = "Reshape";
