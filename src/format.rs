use crate::symbol::ResolvedSymbol;

/// Hex digits needed for a pointer-sized address.
#[cfg(target_pointer_width = "64")]
pub const ADDRESS_WIDTH: usize = 16;
#[cfg(not(target_pointer_width = "64"))]
pub const ADDRESS_WIDTH: usize = 8;

/// Render one trace line with fixed-width index, image and address columns.
pub fn format_line(index: usize, resolved: &ResolvedSymbol, address: usize) -> String {
    format!(
        "{index:<4}{:<35} 0x{address:0width$x} {} + {}",
        resolved.image,
        resolved.symbol,
        resolved.offset,
        width = ADDRESS_WIDTH,
    )
}

pub fn thread_header(index: usize) -> String {
    format!("Thread {index}: \n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(image: &str, symbol: &str, offset: usize) -> ResolvedSymbol {
        ResolvedSymbol {
            image: image.to_owned(),
            symbol: symbol.to_owned(),
            offset,
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_line_layout() {
        let line = format_line(3, &resolved("libsystem_kernel.dylib", "mach_msg_trap", 8), 0x1a2b);
        assert_eq!(
            line,
            "3   libsystem_kernel.dylib              0x0000000000001a2b mach_msg_trap + 8"
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_columns_are_fixed_width() {
        let a = format_line(0, &resolved("a", "x", 0), 1);
        let b = format_line(127, &resolved("libfoo.so", "y", 0), usize::MAX);
        assert_eq!(a.find("0x"), Some(40));
        assert_eq!(b.find("0x"), Some(40));
        assert!(b.contains("0xffffffffffffffff"));
    }

    #[test]
    fn test_long_image_is_not_truncated() {
        let image = "a".repeat(50);
        let line = format_line(1, &resolved(&image, "f", 2), 0x10);
        assert!(line.starts_with(&format!("1   {image} 0x")));
        assert!(line.ends_with(" f + 2"));
    }

    #[test]
    fn test_thread_header() {
        assert_eq!(thread_header(0), "Thread 0: \n");
        assert_eq!(thread_header(12), "Thread 12: \n");
    }
}
