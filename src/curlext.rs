//! Internal extension methods for curl types.
//!
//! These cover a few options and info fields the safe wrapper does not
//! expose. These should probably be upstreamed eventually.

#![allow(unsafe_code)]

use curl::easy::Easy2;
use curl::Error;
use std::ffi::CString;
use std::os::raw::c_long;
use std::path::Path;
use std::time::Duration;

// Raw option numbers from curl.h for options missing from the safe wrapper.
const CURLOPT_POSTREDIR: curl_sys::CURLoption = 161; // long
const CURLOPT_CRLFILE: curl_sys::CURLoption = 10169; // string

// CURL_REDIR_POST_301 | CURL_REDIR_POST_302 | CURL_REDIR_POST_303
const CURL_REDIR_POST_ALL: c_long = 7;

pub(crate) trait EasyExt {
    /// Replay POST bodies across 301/302/303 redirects instead of degrading
    /// to GET.
    fn post_redirect_replay(&mut self, enable: bool) -> Result<(), Error>;

    /// Set a certificate revocation list to check peers against.
    fn crl_file(&mut self, path: &Path) -> Result<(), Error>;

    /// Time from the start of the transfer until the first byte of the
    /// response was received.
    fn time_to_first_byte(&mut self) -> Option<Duration>;
}

impl<H> EasyExt for Easy2<H> {
    fn post_redirect_replay(&mut self, enable: bool) -> Result<(), Error> {
        let value: c_long = if enable { CURL_REDIR_POST_ALL } else { 0 };

        unsafe {
            match curl_sys::curl_easy_setopt(self.raw(), CURLOPT_POSTREDIR, value) {
                curl_sys::CURLE_OK => Ok(()),
                code => Err(Error::new(code)),
            }
        }
    }

    fn crl_file(&mut self, path: &Path) -> Result<(), Error> {
        let path = path_to_cstring(path)?;

        unsafe {
            match curl_sys::curl_easy_setopt(self.raw(), CURLOPT_CRLFILE, path.as_ptr()) {
                curl_sys::CURLE_OK => Ok(()),
                code => Err(Error::new(code)),
            }
        }
    }

    fn time_to_first_byte(&mut self) -> Option<Duration> {
        let mut seconds: f64 = 0.0;

        unsafe {
            if curl_sys::curl_easy_getinfo(
                self.raw(),
                curl_sys::CURLINFO_STARTTRANSFER_TIME,
                &mut seconds as *mut f64,
            ) != curl_sys::CURLE_OK
            {
                return None;
            }
        }

        if seconds > 0.0 {
            Some(Duration::from_secs_f64(seconds))
        } else {
            None
        }
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString, Error> {
    use std::os::unix::ffi::OsStrExt;

    CString::new(path.as_os_str().as_bytes().to_vec())
        .map_err(|_| Error::new(curl_sys::CURLE_URL_MALFORMAT))
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString, Error> {
    let s = path
        .to_str()
        .ok_or_else(|| Error::new(curl_sys::CURLE_URL_MALFORMAT))?;

    CString::new(s).map_err(|_| Error::new(curl_sys::CURLE_URL_MALFORMAT))
}
