mod array;
mod error;
mod map;
mod pool;
mod string;
mod text;
mod value;

pub use array::ValueArray;
pub use error::ObjectError;
pub use map::{Map, Slot};
pub use pool::StringPool;
pub use string::{MAX_STRING_LEN, StrRef, StringHeap, VmString, hash_bytes};
pub use text::{ValueDisplay, format_float, format_value, parse_number};
pub use value::{NativeHandle, Number, Value};
