//! Terminal queries for choosing and laying out progress output.

pub fn use_fancy() -> bool {
    // Safety: isatty only inspects the descriptor.
    unsafe {
        libc::isatty(/* stdout */ 1) == 1
    }
}

pub fn get_cols() -> Option<usize> {
    // Safety: TIOCGWINSZ fills in the zeroed winsize.
    unsafe {
        let mut winsize = std::mem::zeroed::<libc::winsize>();
        if libc::ioctl(1, libc::TIOCGWINSZ, &mut winsize) < 0 {
            return None;
        }
        if winsize.ws_col < 10 {
            // Some environments report tiny or zero widths; ignore them.
            return None;
        }
        Some(winsize.ws_col as usize)
    }
}
