#![doc = r#"
PMOPcm - Formats d'échantillons et flux PCM

Cette crate fournit les types de base partagés par le cœur d'édition audio :
la description des formats PCM (encodage, layout planar/interleavé), les
chunks d'échantillons immuables partagés via [`bytes::Bytes`], et le
protocole de flux pull asynchrone avec remise en file (`push back`) utilisé
par les opérations d'append.

# Architecture

```text
SampleKind / SampleLayout / SampleFormat   description du format
            └── StreamSpec                 format + rate + channels
PcmChunk                                   run d'échantillons immuable
PcmStream (trait pull)                     next_chunk() -> chunk | fin
    ├── MemoryStream                       source en mémoire
    └── PushbackStream<S>                  lookahead avec push_back()
```

# Optimisations

- **Zero-copy** : les chunks sont découpés par frames via `Bytes::slice`,
  seuls les pointeurs sont clonés
- **Pas d'allocation sur le chemin de lecture** : le découpage d'un chunk
  ne copie jamais les échantillons
"#]

mod chunk;
pub mod convert;
mod error;
mod sample_format;
mod stream;

pub use chunk::PcmChunk;
pub use error::PcmError;
pub use sample_format::{SampleFormat, SampleKind, SampleLayout, StreamSpec};
pub use stream::{MemoryStream, PcmStream, PushbackStream};
