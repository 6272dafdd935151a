// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lock-free structures shared by the request producers, the streaming
//! worker and the upload stage.

mod entry;
mod request_queue;
mod ring_buffer;
mod wake;

pub use self::entry::{EntryOutcome, EntryState, SlotId, TextureRequest};
pub use self::request_queue::{
    request_queue, FinishedEntry, ProcessingEntry, QueueCompleter, QueueConsumer, QueueCounters,
    QueueProducer,
};
pub use self::ring_buffer::{texture_ring, RingReader, RingSpan, RingWriter};
pub use self::wake::WakeSignal;
