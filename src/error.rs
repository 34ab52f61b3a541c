// Copyright 2019 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use thiserror::Error;

/// Errors surfaced synchronously to a caller of the core's public API.
///
/// Handler-internal failures (mismatched responses, filtered ENRs, request
/// timeouts) are logged and locally recovered; they never reach here. Only
/// the two purely-local preconditions below, and a send-path failure from
/// the session service, are ever returned to a caller.
#[derive(Debug, Error)]
pub enum Discv5Error {
    /// The session service failed to hand off a request or response.
    #[error("session service send failed: {0}")]
    SessionServiceError(String),
    /// `find_node` was called with the local node's own id as the target.
    #[error("cannot search for the local node id")]
    SearchForLocalIdForbidden,
    /// A core method was called after `stop()` and before the next `start()`.
    #[error("service not started")]
    ServiceNotStarted,
}
