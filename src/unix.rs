//! Loader and execinfo services shared by the macOS and Linux adapters.

use std::{
    ffi::{c_char, c_int, c_void, CStr},
    mem, ptr, slice,
};

use crate::symbol::SymbolInfo;
use crate::walk::MAX_FRAMES;

pub fn lookup_symbol(address: usize) -> SymbolInfo {
    unsafe {
        let mut info: libc::Dl_info = mem::zeroed();
        if libc::dladdr(address as *const c_void, &mut info) == 0 {
            return SymbolInfo::default();
        }
        SymbolInfo {
            image_path: utf8(info.dli_fname),
            image_base: info.dli_fbase as usize,
            symbol_name: utf8(info.dli_sname),
            symbol_address: info.dli_saddr as usize,
        }
    }
}

unsafe fn utf8(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok().map(ToOwned::to_owned)
}

#[inline(never)]
pub fn native_call_stack() -> Vec<String> {
    let mut buf = [ptr::null_mut::<c_void>(); MAX_FRAMES];
    let n = unsafe { libc::backtrace(buf.as_mut_ptr(), buf.len() as c_int) };
    let addrs: Vec<usize> = buf[..n.max(0) as usize].iter().map(|&p| p as usize).collect();
    symbol_names(&addrs)
        .into_iter()
        .map(|s| s.unwrap_or_else(|| "<null>".to_owned()))
        .collect()
}

/// `backtrace_symbols` over arbitrary addresses. Empty when the system
/// could not format anything.
pub fn symbol_names(addresses: &[usize]) -> Vec<Option<String>> {
    if addresses.is_empty() {
        return vec![];
    }
    let ptrs: Vec<*mut c_void> = addresses.iter().map(|&a| a as *mut c_void).collect();
    unsafe {
        let symbols = libc::backtrace_symbols(ptrs.as_ptr(), ptrs.len() as c_int);
        if symbols.is_null() {
            return vec![];
        }
        let names = slice::from_raw_parts(symbols, ptrs.len())
            .iter()
            .map(|&s| {
                if s.is_null() {
                    None
                } else {
                    Some(CStr::from_ptr(s).to_string_lossy().into_owned())
                }
            })
            .collect();
        libc::free(symbols as *mut c_void);
        names
    }
}
