// Concrete task kinds bound to domain actions.

pub mod image_copy;
pub mod vm_create;

pub use image_copy::{ImageCopyHandler, ImageCopyPatch, ImageCopyTask};
pub use vm_create::{VmCreateHandler, VmCreatePatch, VmCreateTask};
