/*
 * SPDX-License-Identifier: Apache-2.0
 */

mod io;
pub use io::PeekBufReader;

pub mod haproxy;
