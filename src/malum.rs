//! `Vec` layout discovery.
//!
//! The slice programs write a finished `Vec<T>` by storing its three words
//! directly, and read one back the same way. `repr(Rust)` does not promise
//! a field order, so the offsets of `(ptr, len, cap)` are probed once per
//! compiled program by building a real `Vec<T>` through the facet list
//! vtable and inspecting the raw words. No layout assumptions are baked in
//! beyond "three words".

use std::mem::MaybeUninit;

use facet::{ListDef, PtrMut, PtrUninit, Shape};

use crate::Error;

/// Word offsets of a `Vec`'s fields, in bytes from its base address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VecOffsets {
    pub(crate) ptr: u32,
    pub(crate) len: u32,
    pub(crate) cap: u32,
}

const WORD: usize = std::mem::size_of::<usize>();

/// Probe a live `Vec` for its field offsets and validate them.
///
/// `vec_shape` is the shape of the `Vec<T>` itself (used to drop the probe
/// instance), `list` its list definition. Fails with `UnsupportedType` if
/// the vtable lacks the required hooks.
pub(crate) fn discover_vec_offsets(
    list: &ListDef,
    vec_shape: &'static Shape,
) -> Result<VecOffsets, Error> {
    let unsupported = || Error::unsupported(vec_shape.type_identifier);
    let init_fn = list.init_in_place_with_capacity().ok_or_else(unsupported)?;
    let as_mut_ptr_fn = list.as_mut_ptr_typed().ok_or_else(unsupported)?;
    let set_len_fn = list.set_len().ok_or_else(unsupported)?;

    let elem_is_zst = list
        .t()
        .layout
        .sized_layout()
        .map(|l| l.size() == 0)
        .unwrap_or(false);

    let mut storage: MaybeUninit<[usize; 3]> = MaybeUninit::zeroed();
    let base = storage.as_mut_ptr() as *mut u8;

    // Build Vec::with_capacity(7) in place, then set len to 3. The words
    // now hold three distinguishable values: the data pointer, 3, and the
    // capacity.
    let vec_ptr: PtrMut = unsafe { (init_fn)(PtrUninit::new(base), 7) };
    let data_ptr = unsafe { (as_mut_ptr_fn)(vec_ptr) } as usize;
    unsafe { (set_len_fn)(vec_ptr, 3) };

    let words: [usize; 3] = unsafe { std::ptr::read(base as *const [usize; 3]) };

    let mut ptr_off = None;
    let mut len_off = None;
    for (i, &w) in words.iter().enumerate() {
        if w == data_ptr && ptr_off.is_none() {
            ptr_off = Some(i);
        } else if w == 3 && len_off.is_none() {
            len_off = Some(i);
        }
    }
    let (ptr_i, len_i) = match (ptr_off, len_off) {
        (Some(p), Some(l)) => (p, l),
        _ => {
            unsafe { (set_len_fn)(vec_ptr, 0) };
            drop_probe(vec_shape, base);
            return Err(unsupported());
        }
    };
    let cap_i = 3 - ptr_i - len_i;
    if !elem_is_zst && words[cap_i] < 7 {
        unsafe { (set_len_fn)(vec_ptr, 0) };
        drop_probe(vec_shape, base);
        return Err(unsupported());
    }

    unsafe { (set_len_fn)(vec_ptr, 0) };
    drop_probe(vec_shape, base);

    Ok(VecOffsets {
        ptr: (ptr_i * WORD) as u32,
        len: (len_i * WORD) as u32,
        cap: (cap_i * WORD) as u32,
    })
}

fn drop_probe(vec_shape: &'static Shape, base: *mut u8) {
    unsafe {
        vec_shape
            .call_drop_in_place(PtrMut::new(base))
            .expect("Vec must have drop_in_place");
    }
}

/// Store a finished `(ptr, len, cap)` triple at `base`.
///
/// Safety: `base` must point at uninitialized, `Vec`-sized storage, and
/// the triple must describe a buffer allocated compatibly with `Vec`'s
/// allocator contract for the element type.
pub(crate) unsafe fn write_parts(
    base: *mut u8,
    off: &VecOffsets,
    ptr: *mut u8,
    len: usize,
    cap: usize,
) {
    unsafe {
        (base.add(off.ptr as usize) as *mut usize).write(ptr as usize);
        (base.add(off.len as usize) as *mut usize).write(len);
        (base.add(off.cap as usize) as *mut usize).write(cap);
    }
}

/// Read a live `Vec`'s data pointer and length from `base`.
///
/// Safety: `base` must point at an initialized `Vec` whose layout matches
/// the probed offsets.
pub(crate) unsafe fn read_parts(base: *const u8, off: &VecOffsets) -> (*const u8, usize) {
    unsafe {
        let ptr = (base.add(off.ptr as usize) as *const usize).read() as *const u8;
        let len = (base.add(off.len as usize) as *const usize).read();
        (ptr, len)
    }
}
