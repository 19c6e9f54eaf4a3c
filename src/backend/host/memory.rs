//! Host-side device allocations.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::backend::MemAccess;

struct Allocation {
    access: MemAccess,
    bytes: RefCell<Vec<u8>>,
    image: Option<[usize; 2]>,
}

/// Shared handle to a simulated device allocation.
///
/// Cloning shares the allocation, the way a `cl_mem` handle set as a kernel
/// argument refers to the same memory object as the one the host created.
#[derive(Clone)]
pub struct HostMem(Rc<Allocation>);

impl HostMem {
    pub(super) fn buffer(access: MemAccess, size: usize) -> Self {
        Self(Rc::new(Allocation {
            access,
            bytes: RefCell::new(vec![0; size]),
            image: None,
        }))
    }

    pub(super) fn image(access: MemAccess, width: usize, height: usize, init: Option<&[f32]>) -> Self {
        let mut bytes = vec![0u8; width * height * 4];
        if let Some(texels) = init {
            bytes.copy_from_slice(bytemuck::cast_slice(&texels[..width * height]));
        }
        Self(Rc::new(Allocation {
            access,
            bytes: RefCell::new(bytes),
            image: Some([width, height]),
        }))
    }

    /// Allocation size in bytes
    pub fn size(&self) -> usize {
        self.0.bytes.borrow().len()
    }

    pub fn access(&self) -> MemAccess {
        self.0.access
    }

    /// `[width, height]` for image objects
    pub fn image_extent(&self) -> Option<[usize; 2]> {
        self.0.image
    }

    pub(super) fn bytes(&self) -> Ref<'_, Vec<u8>> {
        self.0.bytes.borrow()
    }

    pub(super) fn bytes_mut(&self) -> RefMut<'_, Vec<u8>> {
        self.0.bytes.borrow_mut()
    }

    /// Whether both handles refer to the same allocation
    pub fn same_object(&self, other: &HostMem) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A kernel argument value as stored in a host kernel's slot table.
#[derive(Clone)]
pub enum HostArg {
    Scalar(Vec<u8>),
    Mem(HostMem),
}
