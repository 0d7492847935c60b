#![doc = r#"
PMOTimeline - Store de timeline segmenté pour l'édition audio

Cette crate est le cœur d'un éditeur audio non linéaire : elle maintient une
timeline d'échantillons potentiellement très longue et mutable dans un hôte
contraint en mémoire, en découpant chaque piste en segments à capacité
bornée, compressés au repos et décompressés à la demande.

# Architecture

```text
Track                       piste : spec PCM + arbre de segments
  └── TimelineTree          arbre order-statistics (arène d'indices)
        └── Segment         buffer brut borné ↔ blob FLAC au repos
                            (Cold ↔ Hot, refcount open/close)
```

Les opérations de flux (lecture, append, overwrite, replace) parcourent
l'arbre segment par segment ; tout le travail codec (décodage, compression,
rendu de waveform) passe par le pool borné de `pmopool`, jamais en direct.

# Cycle de vie d'un segment

`open()` décompresse paresseusement le blob persisté et matérialise le
buffer brut partagé ; `close(modified)` décrémente le compteur de lecteurs
et, au passage à zéro avec modification, déclenche en arrière-plan la
recompression et le rendu de waveform avant de libérer le buffer. La tâche
de compression est observable via le handle conservé sur le segment : un
`flush()` de piste l'attend, une réouverture la laisse d'abord aboutir.

# Équilibrage

L'append étend toujours l'épine droite de l'arbre sans rééquilibrer (chemin
chaud de l'import) ; un `rebalance` complet aplatit puis reconstruit l'arbre
en fin d'opération groupée, ramenant les lectures positionnelles à O(log n).
"#]

mod config;
mod error;
mod events;
mod reader;
mod segment;
mod track;
mod tree;
pub mod waveform;

pub use config::TimelineConfig;
pub use error::TimelineError;
pub use events::{TrackEvent, TrackEvents};
pub use reader::TrackReader;
pub use segment::SegmentInfo;
pub use track::Track;
