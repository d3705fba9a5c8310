//! Win32 plumbing for the window-message channel.

use crate::error::transport::TransportError;
use crate::pipe::frame::PipeMessage;
use crate::pipe::legacy::{LegacyTarget, WindowFrame, decode_window_message};

use common::ErrorLocation;

use std::cell::RefCell;
use std::io::{Error as IoError, ErrorKind};
use std::panic::Location;
use std::ptr::{null, null_mut};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use windows_sys::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::DataExchange::COPYDATASTRUCT;
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DispatchMessageW, FindWindowW, GetMessageW, HWND_MESSAGE, MSG,
    RegisterClassW, SMTO_ABORTIFHUNG, SendMessageTimeoutW, TranslateMessage, WM_COPYDATA, WNDCLASSW,
};

thread_local! {
    static WINDOW_SINK: RefCell<Option<mpsc::Sender<PipeMessage>>> = const { RefCell::new(None) };
}

pub(crate) fn to_wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

fn find_window(target: &LegacyTarget) -> HWND {
    // SAFETY: the wide strings are null-terminated and live across the call.
    unsafe {
        match target {
            LegacyTarget::WindowClass(class) => {
                let class = to_wide(class);
                FindWindowW(class.as_ptr(), null())
            }
            LegacyTarget::WindowTitle(title) => {
                let title = to_wide(title);
                FindWindowW(null(), title.as_ptr())
            }
        }
    }
}

#[track_caller]
pub(crate) fn send_copy_data(
    target: &LegacyTarget,
    mut frame: WindowFrame,
    timeout: Duration,
) -> Result<(), TransportError> {
    let hwnd = find_window(target);
    if hwnd.is_null() {
        return Err(TransportError::Connect {
            message: format!("No window found for {target:?}"),
            location: ErrorLocation::from(Location::caller()),
            source: IoError::new(ErrorKind::NotFound, "window not found"),
        });
    }

    let copy = COPYDATASTRUCT {
        dwData: frame.command,
        cbData: frame.declared_len(),
        lpData: frame.data.as_mut_ptr().cast(),
    };
    let mut result: usize = 0;
    let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

    // SAFETY: `copy` and the buffer it points at outlive the synchronous send.
    let sent = unsafe {
        SendMessageTimeoutW(
            hwnd,
            WM_COPYDATA,
            0,
            &copy as *const COPYDATASTRUCT as LPARAM,
            SMTO_ABORTIFHUNG,
            timeout_ms,
            &mut result,
        )
    };

    if sent == 0 {
        return Err(TransportError::Io {
            message: format!(
                "SendMessageTimeout to {target:?} failed: {}",
                IoError::last_os_error()
            ),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    debug!("Delivered command {} to {target:?}", frame.command);
    Ok(())
}

/// Create a hidden message-only window of `class_name` and pump its queue.
///
/// Blocks the calling thread for the life of the window; received frames are
/// forwarded into `sink`.
pub(crate) fn run_message_window(
    class_name: &str,
    sink: mpsc::Sender<PipeMessage>,
) -> Result<(), TransportError> {
    WINDOW_SINK.with(|slot| *slot.borrow_mut() = Some(sink));
    let class = to_wide(class_name);

    // SAFETY: every pointer handed to Win32 below is either null or points at
    // `class`/`window_class`/`message`, all of which outlive the calls.
    unsafe {
        let instance = GetModuleHandleW(null());

        let mut window_class: WNDCLASSW = std::mem::zeroed();
        window_class.lpfnWndProc = Some(window_proc);
        window_class.hInstance = instance;
        window_class.lpszClassName = class.as_ptr();

        if RegisterClassW(&window_class) == 0 {
            return Err(TransportError::Listen {
                message: format!(
                    "RegisterClassW({class_name}) failed: {}",
                    IoError::last_os_error()
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let hwnd = CreateWindowExW(
            0,
            class.as_ptr(),
            class.as_ptr(),
            0,
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            null_mut(),
            instance,
            null(),
        );
        if hwnd.is_null() {
            return Err(TransportError::Listen {
                message: format!(
                    "CreateWindowExW({class_name}) failed: {}",
                    IoError::last_os_error()
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        debug!("Message window {class_name} created");

        let mut message: MSG = std::mem::zeroed();
        while GetMessageW(&mut message, null_mut(), 0, 0) > 0 {
            TranslateMessage(&message);
            DispatchMessageW(&message);
        }
    }

    Ok(())
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_COPYDATA && lparam != 0 {
        // SAFETY: for WM_COPYDATA the system guarantees `lparam` points at a
        // COPYDATASTRUCT valid for the duration of this call.
        let copy = unsafe { &*(lparam as *const COPYDATASTRUCT) };
        let data = if copy.lpData.is_null() || copy.cbData == 0 {
            &[][..]
        } else {
            // SAFETY: `lpData` holds `cbData` readable bytes per the same contract.
            unsafe { std::slice::from_raw_parts(copy.lpData as *const u8, copy.cbData as usize) }
        };

        let frame = decode_window_message(copy.dwData, copy.cbData, data);
        WINDOW_SINK.with(|slot| {
            if let Some(sink) = slot.borrow().as_ref()
                && sink.blocking_send(frame).is_err()
            {
                warn!("Window message receiver dropped");
            }
        });
        return 1;
    }

    // SAFETY: forwarding the unmodified arguments we were called with.
    unsafe { DefWindowProcW(hwnd, message, wparam, lparam) }
}
