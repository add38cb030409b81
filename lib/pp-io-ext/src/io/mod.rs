/*
 * SPDX-License-Identifier: Apache-2.0
 */

mod peek;
pub use peek::PeekBufReader;
