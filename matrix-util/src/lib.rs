pub mod balance;
pub mod common_io;
pub mod mtx_io;
pub mod sparse_util;
pub mod tensor_io;
pub mod traits;
pub mod utils;
