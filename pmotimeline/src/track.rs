//! Piste audio : spec PCM + arbre de segments + opérations de flux.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pmocodec::{CodecEngine, EncodeRequest, FilterHandle, FilterSpec};
use pmopcm::{PcmChunk, PcmStream, PushbackStream, SampleFormat, SampleKind, StreamSpec};
use pmopool::{PoolError, WorkerPool};
use pmostore::{BlobStore, StoreKeys};

use crate::{
    reader::TrackReader,
    segment::{CompressionHandle, NodeId, Segment, SegmentInfo, SegmentPayload, SegmentRecord},
    tree::TimelineTree,
    waveform, TimelineConfig, TimelineError, TrackEvent, TrackEvents,
};

/// Record persisté d'une piste (clé `<prefix>-track-<id>`) : format et liste
/// ordonnée des ids de segments. Les `pos` de l'arbre ne sont jamais
/// persistés, le chargement reconstruit l'arbre équilibré.
#[derive(Debug, Serialize, Deserialize)]
struct TrackRecord {
    id: Uuid,
    format: SampleFormat,
    sample_rate: u32,
    channels: u16,
    segments: Vec<Uuid>,
    created_at: DateTime<Utc>,
}

/// Piste : possède son arbre de timeline et pilote le cycle de vie des
/// segments à travers le pool de workers codec et le blob store.
///
/// Modèle d'exécution : l'orchestration (parcours d'arbre, comptabilité des
/// segments) est single-threaded via `&mut self` ; seuls les workers du pool
/// transforment des buffers, jamais l'état de l'arbre. L'emprunt exclusif
/// matérialise aussi la précondition d'`overwrite` : pas d'append ou de
/// replace concurrent sur la même piste.
pub struct Track<E: CodecEngine + 'static> {
    id: Uuid,
    spec: StreamSpec,
    tree: TimelineTree,
    pool: WorkerPool<E>,
    store: Arc<dyn BlobStore>,
    keys: StoreKeys,
    config: TimelineConfig,
    events: TrackEvents,
    created_at: DateTime<Utc>,
}

impl<E: CodecEngine + 'static> Track<E> {
    /// Crée une piste vide.
    ///
    /// Le kind au repos doit être compressible sans perte par le moteur
    /// FLAC : `I16` ou `I24`. `I32`/`F32` restent des formats transitoires
    /// de filtrage. Le layout est normalisé en interleavé pour les buffers
    /// bruts ; au repos, le codec stocke de toute façon chaque canal dans
    /// son propre subframe.
    pub fn new(
        spec: StreamSpec,
        pool: WorkerPool<E>,
        store: Arc<dyn BlobStore>,
        config: TimelineConfig,
    ) -> Result<Self, TimelineError> {
        Self::with_parts(Uuid::new_v4(), spec, pool, store, config, Utc::now())
    }

    fn with_parts(
        id: Uuid,
        spec: StreamSpec,
        pool: WorkerPool<E>,
        store: Arc<dyn BlobStore>,
        config: TimelineConfig,
        created_at: DateTime<Utc>,
    ) -> Result<Self, TimelineError> {
        spec.validate()
            .map_err(|e| TimelineError::UnsupportedFormat(e.to_string()))?;
        if !matches!(spec.format.kind(), SampleKind::I16 | SampleKind::I24) {
            return Err(TimelineError::UnsupportedFormat(format!(
                "at-rest sample kind {} cannot round-trip losslessly",
                spec.format.kind()
            )));
        }
        config.validate()?;
        let keys = StoreKeys::new(config.key_prefix.clone());
        Ok(Self {
            id,
            spec: StreamSpec::new(spec.format.as_interleaved(), spec.sample_rate, spec.channels),
            tree: TimelineTree::new(),
            pool,
            store,
            keys,
            config,
            events: TrackEvents::new(),
            created_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Durée totale en frames.
    pub fn duration(&self) -> u64 {
        self.tree.duration()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Nombre de segments de la piste.
    pub fn segment_count(&self) -> usize {
        self.tree.len()
    }

    /// Instantané in-order des segments (id, len, capacité).
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.tree
            .in_order_ids()
            .into_iter()
            .map(|n| {
                let seg = self.tree.node(n);
                SegmentInfo {
                    id: seg.id,
                    len: seg.len,
                    capacity: seg.capacity,
                }
            })
            .collect()
    }

    /// Localise un offset : id du segment couvrant + offset local.
    pub fn locate(&self, offset: u64) -> Option<(Uuid, u64)> {
        self.tree
            .find(offset)
            .map(|(node, local)| (self.tree.node(node).id, local))
    }

    /// S'abonne aux événements de la piste.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<TrackEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Cycle de vie des segments (protocole open/close refcounté)
    // ------------------------------------------------------------------

    /// Ouvre un segment : matérialise le buffer brut au besoin (décodage via
    /// le pool) et incrémente le compteur de lecteurs. Les ouvertures
    /// concurrentes d'un même nœud partagent le même buffer.
    pub(crate) async fn open_segment(&mut self, node: NodeId) -> Result<(), TimelineError> {
        // Laisser aboutir une compression en vol : le blob doit être au
        // repos avant de le recharger.
        if let Some(handle) = self.tree.node_mut(node).compression.take() {
            join_compression(handle).await?;
        }

        if matches!(self.tree.node(node).payload, SegmentPayload::Cold) {
            let (id, len, capacity) = {
                let seg = self.tree.node(node);
                (seg.id, seg.len, seg.capacity)
            };
            let bpf = self.spec.bytes_per_frame();
            let mut buffer = vec![0u8; capacity as usize * bpf];
            if len > 0 {
                let blob = self
                    .store
                    .get(&self.keys.data(&id.to_string()))
                    .await?
                    .ok_or(TimelineError::MissingBlob(id))?;
                let decoded = self
                    .pool
                    .enqueue_sync(move |engine: Arc<E>| {
                        async move {
                            engine
                                .decode(blob)
                                .await
                                .map_err(|e| PoolError::Task(e.to_string()))
                        }
                        .boxed()
                    })
                    .await?;
                if !decoded.spec.compatible_with(&self.spec) {
                    return Err(TimelineError::FormatMismatch {
                        expected: self.spec.to_string(),
                        actual: decoded.spec.to_string(),
                    });
                }
                if decoded.frames() != len {
                    return Err(TimelineError::Codec(format!(
                        "segment {id} decoded to {} frames, expected {len}",
                        decoded.frames()
                    )));
                }
                buffer[..decoded.data.len()].copy_from_slice(&decoded.data);
                tracing::debug!(segment = %id, frames = len, "segment decoded and cached");
            }
            self.tree.node_mut(node).payload = SegmentPayload::Hot(buffer);
        }

        self.tree.node_mut(node).readers += 1;
        Ok(())
    }

    /// Ferme un segment : décrémente le compteur de lecteurs (jamais sous
    /// zéro, les fermetures excédentaires sont des no-ops) et, au passage à
    /// zéro, libère le buffer brut — via une recompression d'arrière-plan si
    /// un des ouvreurs a signalé une modification.
    pub(crate) fn close_segment(&mut self, node: NodeId, modified: bool) {
        let seg = self.tree.node_mut(node);
        if seg.readers == 0 {
            // Fermeture excédentaire : no-op, le flag modified d'une session
            // fantôme ne doit pas déclencher de recompression.
            tracing::warn!(segment = %seg.id, "close without matching open");
            return;
        }
        if modified {
            seg.modified = true;
        }
        seg.readers -= 1;
        if seg.readers > 0 {
            return;
        }

        let payload = std::mem::replace(&mut seg.payload, SegmentPayload::Cold);
        let SegmentPayload::Hot(buffer) = payload else {
            return;
        };
        if !seg.modified {
            tracing::debug!(segment = %seg.id, "raw buffer released");
            return;
        }
        seg.modified = false;
        seg.waveform = None;
        let id = seg.id;
        let len = seg.len;
        if len == 0 {
            return;
        }

        let mut data = buffer;
        data.truncate(len as usize * self.spec.bytes_per_frame());
        let handle = self.spawn_compression(id, len, Bytes::from(data));
        self.tree.node_mut(node).compression = Some(handle);
    }

    /// Planifie la compression + le rendu de waveform d'un segment modifié.
    ///
    /// La tâche encode via le pool puis persiste blob, waveform et record de
    /// métadonnées. Le handle retourné est conservé sur le segment : une
    /// réouverture ou un `flush` l'attend ; un échec non attendu est logué
    /// et publié en événement, jamais perdu en silence.
    fn spawn_compression(&self, id: Uuid, len: u64, data: Bytes) -> CompressionHandle {
        let pool = self.pool.clone();
        let store = Arc::clone(&self.store);
        let keys = self.keys.clone();
        let spec = self.spec;
        let bucket = self.config.waveform_bucket_frames as usize;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result: Result<(), TimelineError> = async {
                let (encoded, wave) = pool
                    .enqueue_sync(move |engine: Arc<E>| {
                        async move {
                            let peaks = waveform::render_peaks(&data, &spec, bucket);
                            let encoded = engine
                                .encode(EncodeRequest { spec, data })
                                .await
                                .map_err(|e| PoolError::Task(e.to_string()))?;
                            Ok((encoded, Bytes::from(peaks)))
                        }
                        .boxed()
                    })
                    .await?;
                let sid = id.to_string();
                store.set(&keys.data(&sid), encoded).await?;
                store.set(&keys.wave(&sid), wave).await?;
                let record = serde_json::to_vec(&SegmentRecord { len })
                    .map_err(|e| TimelineError::Corrupt(e.to_string()))?;
                store.set(&keys.segment(&sid), Bytes::from(record)).await?;
                Ok(())
            }
            .await;
            match &result {
                Ok(()) => {
                    tracing::debug!(segment = %id, frames = len, "segment compressed and persisted")
                }
                Err(err) => {
                    tracing::error!(segment = %id, error = %err, "background compression failed");
                    events.publish(TrackEvent::CompressionFailed {
                        segment: id,
                        error: err.to_string(),
                    });
                }
            }
            result
        })
    }

    /// Copie un chunk dans le buffer brut d'un segment ouvert, à partir de
    /// la frame `at`. Étend `len` si l'écriture dépasse la zone valide.
    pub(crate) fn write_into(
        &mut self,
        node: NodeId,
        at: u64,
        chunk: &PcmChunk,
    ) -> Result<(), TimelineError> {
        if !chunk.spec().compatible_with(&self.spec) || chunk.spec().format.is_planar() {
            return Err(TimelineError::FormatMismatch {
                expected: self.spec.to_string(),
                actual: chunk.spec().to_string(),
            });
        }
        let bpf = self.spec.bytes_per_frame();
        let frames = chunk.frames();
        let seg = self.tree.node_mut(node);
        if at + frames > seg.capacity {
            return Err(TimelineError::BufferOverflow {
                capacity: seg.capacity,
                offset: at,
                requested: frames,
            });
        }
        let SegmentPayload::Hot(buffer) = &mut seg.payload else {
            return Err(TimelineError::InconsistentTree(
                "write into a cold segment",
            ));
        };
        let start = at as usize * bpf;
        buffer[start..start + chunk.data().len()].copy_from_slice(chunk.data());
        seg.len = seg.len.max(at + frames);
        seg.modified = true;
        Ok(())
    }

    /// Copie une sous-plage d'un segment ouvert dans un chunk.
    pub(crate) fn slice_segment(
        &self,
        node: NodeId,
        from: u64,
        frames: u64,
    ) -> Result<PcmChunk, TimelineError> {
        let seg = self.tree.node(node);
        let SegmentPayload::Hot(buffer) = &seg.payload else {
            return Err(TimelineError::InconsistentTree("slice of a cold segment"));
        };
        let bpf = self.spec.bytes_per_frame();
        let start = from as usize * bpf;
        let end = (from + frames) as usize * bpf;
        Ok(PcmChunk::new(
            self.spec,
            Bytes::copy_from_slice(&buffer[start..end]),
        )?)
    }

    // ------------------------------------------------------------------
    // Opérations de flux
    // ------------------------------------------------------------------

    /// Flux de lecture sur `[start, start + frames)` (ou jusqu'à la fin).
    /// Chaque segment produit est refermé dès son chunk émis.
    pub fn reader(&mut self, start: u64, frames: Option<u64>) -> TrackReader<'_, E> {
        self.reader_with(start, frames, false)
    }

    /// Comme [`reader`](Self::reader), mais `keep_open` laisse chaque
    /// segment produit ouvert : l'appelant doit les refermer via
    /// [`TrackReader::close_open_segments`], sinon le compteur de lecteurs
    /// fuit — il n'y a pas de finaliseur automatique.
    pub fn reader_with(
        &mut self,
        start: u64,
        frames: Option<u64>,
        keep_open: bool,
    ) -> TrackReader<'_, E> {
        let cursor = self.tree.find(start);
        TrackReader::new(self, cursor, frames.unwrap_or(u64::MAX), keep_open)
    }

    /// Append en flux : copie la source dans le segment ouvert en écriture
    /// (le plus à droite), en allouant un frère neuf à chaque débordement —
    /// le reliquat non consommé est rendu à la source et relu tel quel.
    ///
    /// En fin de flux, l'arbre est entièrement rééquilibré, le record de
    /// piste persisté et la nouvelle durée publiée.
    pub async fn append<S: PcmStream>(&mut self, source: S) -> Result<u64, TimelineError> {
        self.check_source_spec(&source.spec())?;
        let mut stream = PushbackStream::new(source);
        let mut cursor: Option<NodeId> = None;
        let mut written = 0u64;

        loop {
            let Some(chunk) = stream.next_chunk().await? else {
                break;
            };
            if chunk.is_empty() {
                continue;
            }
            let node = match cursor {
                Some(node) => node,
                None => {
                    let node = self.append_target().await?;
                    cursor = Some(node);
                    node
                }
            };
            let (len, capacity) = {
                let seg = self.tree.node(node);
                (seg.len, seg.capacity)
            };
            let room = capacity - len;
            if room == 0 {
                self.close_segment(node, true);
                cursor = None;
                stream.push_back(chunk);
                continue;
            }
            let take = chunk.frames().min(room);
            let (head, tail) = chunk.split_at_frames(take);
            if !tail.is_empty() {
                stream.push_back(tail);
            }
            self.write_into(node, len, &head)?;
            written += take;
        }

        if let Some(node) = cursor {
            self.close_segment(node, true);
        }
        self.tree.rebalance();
        self.events.publish(TrackEvent::DurationChanged {
            frames: self.duration(),
        });
        self.save().await?;
        tracing::debug!(track = %self.id, frames = written, "append completed");
        Ok(written)
    }

    /// Segment cible de l'append : le plus à droite s'il a encore de la
    /// place, sinon un segment neuf accroché à l'épine droite.
    async fn append_target(&mut self) -> Result<NodeId, TimelineError> {
        if let Some(tail) = self.tree.rightmost() {
            if !self.tree.node(tail).is_full() {
                self.open_segment(tail).await?;
                return Ok(tail);
            }
        }
        let window = self.config.window_frames(self.spec.sample_rate);
        let segment = Segment::allocate(&self.spec, window)?;
        tracing::debug!(segment = %segment.id, "allocating fresh rightmost segment");
        let node = self.tree.insert_detached(segment);
        self.tree.append_rightmost(node);
        self.open_segment(node).await?;
        Ok(node)
    }

    /// Écrase en place `[start, start + frames)` avec la source, sans
    /// changer la durée ni la forme de l'arbre : double curseur, copie
    /// directe dans les buffers des segments cibles (ouverts `keep_open`),
    /// fermeture `modified` de chaque segment dont la zone est consommée.
    ///
    /// Source plus courte que la plage : la queue garde ses données
    /// existantes, le nombre de frames réellement écrites est retourné.
    /// Source plus longue : l'excédent n'est pas consommé.
    pub async fn overwrite<S: PcmStream>(
        &mut self,
        start: u64,
        frames: u64,
        source: S,
    ) -> Result<u64, TimelineError> {
        self.check_source_spec(&source.spec())?;
        let duration = self.duration();
        if start >= duration || frames == 0 {
            return Ok(0);
        }
        let end = start.saturating_add(frames).min(duration);
        let mut remaining = end - start;
        let mut stream = PushbackStream::new(source);
        let mut cursor = self.tree.find(start);
        let mut written = 0u64;

        while remaining > 0 {
            let Some((node, mut local)) = cursor else {
                break;
            };
            self.open_segment(node).await?;
            let seg_len = self.tree.node(node).len;
            let mut touched = false;
            while local < seg_len && remaining > 0 {
                let chunk = match stream.next_chunk().await? {
                    Some(chunk) if chunk.is_empty() => continue,
                    Some(chunk) => chunk,
                    None => {
                        self.close_segment(node, touched);
                        return Ok(written);
                    }
                };
                let take = chunk.frames().min(seg_len - local).min(remaining);
                let (head, tail) = chunk.split_at_frames(take);
                if !tail.is_empty() {
                    stream.push_back(tail);
                }
                self.write_into(node, local, &head)?;
                local += take;
                remaining -= take;
                written += take;
                touched = true;
            }
            self.close_segment(node, touched);
            cursor = self.tree.successor(node).map(|n| (n, 0));
        }
        Ok(written)
    }

    /// Splice : retire `[start, end)` et y insère optionnellement le contenu
    /// d'une piste de remplacement (consommée).
    ///
    /// Chirurgie sur la liste aplatie des segments : les segments entièrement
    /// couverts sont supprimés, ceux qui chevauchent une borne sont retaillés
    /// en segments neufs (l'ancien est jeté), les segments du remplacement
    /// sont insérés à leur place, puis l'arbre est reconstruit depuis la
    /// liste ordonnée résultante.
    pub async fn replace(
        &mut self,
        start: u64,
        end: u64,
        replacement: Option<Track<E>>,
    ) -> Result<(), TimelineError> {
        if start > end {
            return Err(TimelineError::InvalidRange { start, end });
        }
        let duration = self.duration();
        let start = start.min(duration);
        let end = end.min(duration);
        if let Some(rep) = &replacement {
            if !rep.spec.compatible_with(&self.spec) {
                return Err(TimelineError::FormatMismatch {
                    expected: self.spec.to_string(),
                    actual: rep.spec.to_string(),
                });
            }
            if rep.keys.prefix() != self.keys.prefix() {
                return Err(TimelineError::StoreMismatch);
            }
        }

        let ids = self.tree.in_order_ids();
        let mut before: Vec<NodeId> = Vec::new();
        let mut after: Vec<NodeId> = Vec::new();
        let mut abs = 0u64;
        for id in ids {
            let len = self.tree.node(id).len;
            let seg_start = abs;
            let seg_end = abs + len;
            abs = seg_end;

            if seg_end <= start {
                before.push(id);
            } else if seg_start >= end {
                after.push(id);
            } else if seg_start >= start && seg_end <= end {
                self.discard_segment(id).await?;
            } else {
                // Chevauchement d'une borne : retailler les tranches
                // conservées en segments neufs, jeter l'original.
                self.open_segment(id).await?;
                if seg_start < start {
                    before.push(self.split_slice(id, 0, start - seg_start)?);
                }
                if seg_end > end {
                    after.push(self.split_slice(id, end - seg_start, seg_end - end)?);
                }
                self.close_segment(id, false);
                self.discard_segment(id).await?;
            }
        }

        let mut order = before;
        if let Some(rep) = replacement {
            for segment in rep.into_segments().await? {
                order.push(self.tree.insert_detached(segment));
            }
        }
        order.extend(after);
        self.tree.rebuild_from(&order);

        self.events.publish(TrackEvent::DurationChanged {
            frames: self.duration(),
        });
        self.save().await?;
        tracing::debug!(track = %self.id, start, end, "range replaced");
        Ok(())
    }

    /// Copie `[from, from + frames)` du segment source (ouvert) dans un
    /// segment tout neuf, immédiatement clos `modified` pour déclencher sa
    /// compression. Retourne le nœud détaché.
    fn split_slice(&mut self, src: NodeId, from: u64, frames: u64) -> Result<NodeId, TimelineError> {
        let bpf = self.spec.bytes_per_frame();
        let window = self.config.window_frames(self.spec.sample_rate);
        let mut segment = Segment::allocate(&self.spec, window.max(frames))?;
        {
            let source = self.tree.node(src);
            let SegmentPayload::Hot(buffer) = &source.payload else {
                return Err(TimelineError::InconsistentTree("slice of a cold segment"));
            };
            let start = from as usize * bpf;
            let end = start + frames as usize * bpf;
            let SegmentPayload::Hot(dest) = &mut segment.payload else {
                return Err(TimelineError::InconsistentTree(
                    "freshly allocated segment is cold",
                ));
            };
            dest[..end - start].copy_from_slice(&buffer[start..end]);
        }
        segment.len = frames;
        segment.modified = true;
        segment.readers = 1;
        let node = self.tree.insert_detached(segment);
        self.close_segment(node, true);
        Ok(node)
    }

    /// Retire un segment de l'arène et supprime ses blobs persistés. Attend
    /// une compression en vol pour ne pas laisser la tâche recréer les blobs
    /// d'un segment déjà jeté.
    async fn discard_segment(&mut self, node: NodeId) -> Result<(), TimelineError> {
        let mut segment = self.tree.remove(node);
        if let Some(handle) = segment.compression.take() {
            let _ = handle.await;
        }
        let sid = segment.id.to_string();
        self.store.remove(&self.keys.data(&sid)).await?;
        self.store.remove(&self.keys.wave(&sid)).await?;
        self.store.remove(&self.keys.segment(&sid)).await?;
        tracing::debug!(segment = %segment.id, "segment discarded");
        Ok(())
    }

    /// Démonte la piste en sa liste ordonnée de segments (handles de
    /// compression compris) et supprime son record persisté.
    async fn into_segments(mut self) -> Result<Vec<Segment>, TimelineError> {
        let ids = self.tree.in_order_ids();
        let mut segments = Vec::with_capacity(ids.len());
        for id in ids {
            segments.push(self.tree.remove(id));
        }
        self.store
            .remove(&self.keys.track(&self.id.to_string()))
            .await?;
        Ok(segments)
    }

    /// Applique un graphe de filtre (préservant la longueur) sur
    /// `[start, end)`, segment par segment, via le pool. Les formats
    /// transitoires du graphe sont renormalisés au format de la piste avant
    /// chaque fermeture.
    pub async fn filter_range(
        &mut self,
        start: u64,
        end: u64,
        filter: &FilterSpec,
    ) -> Result<(), TimelineError> {
        let duration = self.duration();
        let end = end.min(duration);
        if start >= end {
            return Ok(());
        }
        let mut cursor = self.tree.find(start);
        let mut remaining = end - start;
        let mut graph: Option<Box<dyn FilterHandle>> = None;

        while remaining > 0 {
            let Some((node, local)) = cursor else {
                break;
            };
            self.open_segment(node).await?;
            let seg_len = self.tree.node(node).len;
            let span = (seg_len - local).min(remaining);
            if span == 0 {
                self.close_segment(node, false);
                cursor = self.tree.successor(node).map(|n| (n, 0));
                continue;
            }
            let chunk = self.slice_segment(node, local, span)?;
            let is_final = remaining == span;
            let spec = self.spec;
            let descriptor = filter.clone();
            let carried = graph.take();
            let (handle, filtered) = self
                .pool
                .enqueue_sync(move |engine: Arc<E>| {
                    async move {
                        let mut handle = match carried {
                            Some(handle) => handle,
                            None => engine
                                .filter_graph(&descriptor, spec, spec)
                                .await
                                .map_err(|e| PoolError::Task(e.to_string()))?,
                        };
                        let out = handle
                            .apply(chunk, is_final)
                            .await
                            .map_err(|e| PoolError::Task(e.to_string()))?;
                        Ok((handle, out))
                    }
                    .boxed()
                })
                .await?;
            graph = Some(handle);
            if filtered.frames() != span {
                self.close_segment(node, false);
                return Err(TimelineError::Codec(
                    "filter graph changed the frame count".into(),
                ));
            }
            let normalized = pmopcm::convert::convert_format(&filtered, self.spec.format)?;
            self.write_into(node, local, &normalized)?;
            self.close_segment(node, true);
            remaining -= span;
            cursor = self.tree.successor(node).map(|n| (n, 0));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistance
    // ------------------------------------------------------------------

    /// Persiste le record de la piste : format et liste ordonnée des ids de
    /// segments. Les données et métadonnées de segments sont persistées
    /// séparément et paresseusement par leurs tâches de compression.
    pub async fn save(&self) -> Result<(), TimelineError> {
        let record = TrackRecord {
            id: self.id,
            format: self.spec.format,
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
            segments: self
                .tree
                .in_order_ids()
                .into_iter()
                .map(|n| self.tree.node(n).id)
                .collect(),
            created_at: self.created_at,
        };
        let blob = serde_json::to_vec(&record).map_err(|e| TimelineError::Corrupt(e.to_string()))?;
        self.store
            .set(&self.keys.track(&self.id.to_string()), Bytes::from(blob))
            .await?;
        Ok(())
    }

    /// Recharge une piste depuis son record persisté. Tous les segments
    /// reviennent `Cold` ; l'arbre est reconstruit équilibré depuis la liste
    /// ordonnée d'ids.
    pub async fn load(
        id: Uuid,
        pool: WorkerPool<E>,
        store: Arc<dyn BlobStore>,
        config: TimelineConfig,
    ) -> Result<Self, TimelineError> {
        let keys = StoreKeys::new(config.key_prefix.clone());
        let blob = store
            .get(&keys.track(&id.to_string()))
            .await?
            .ok_or(TimelineError::MissingRecord(id))?;
        let record: TrackRecord =
            serde_json::from_slice(&blob).map_err(|e| TimelineError::Corrupt(e.to_string()))?;
        let spec = StreamSpec::new(record.format, record.sample_rate, record.channels);
        let mut track = Self::with_parts(id, spec, pool, store, config, record.created_at)?;

        let window = track.config.window_frames(track.spec.sample_rate);
        let mut order = Vec::with_capacity(record.segments.len());
        for segment_id in record.segments {
            let len = match track
                .store
                .get(&track.keys.segment(&segment_id.to_string()))
                .await?
            {
                Some(meta) => {
                    serde_json::from_slice::<SegmentRecord>(&meta)
                        .map_err(|e| TimelineError::Corrupt(e.to_string()))?
                        .len
                }
                None => 0,
            };
            let segment = Segment::cold(segment_id, len, window.max(len));
            order.push(track.tree.insert_detached(segment));
        }
        track.tree.rebuild_from(&order);
        tracing::debug!(track = %id, segments = order.len(), "track loaded");
        Ok(track)
    }

    /// Détruit la piste : libère tous les segments (blobs compris) puis
    /// supprime son propre record.
    pub async fn destroy(mut self) -> Result<(), TimelineError> {
        for node in self.tree.in_order_ids() {
            self.discard_segment(node).await?;
        }
        self.store
            .remove(&self.keys.track(&self.id.to_string()))
            .await?;
        Ok(())
    }

    /// Barrière : attend toutes les compressions d'arrière-plan de la piste
    /// (en propageant leurs échecs) puis vide le pool. À appeler avant tout
    /// travail dépendant des blobs au repos, typiquement un export.
    pub async fn flush(&mut self) -> Result<(), TimelineError> {
        for node in self.tree.in_order_ids() {
            if let Some(handle) = self.tree.node_mut(node).compression.take() {
                join_compression(handle).await?;
            }
        }
        self.pool.flush().await;
        Ok(())
    }

    /// Waveform rendue d'un segment : cache mémoire, sinon rechargée depuis
    /// le store (après avoir laissé aboutir une compression en vol).
    pub async fn waveform(&mut self, segment: Uuid) -> Result<Option<Bytes>, TimelineError> {
        let Some(node) = self
            .tree
            .in_order_ids()
            .into_iter()
            .find(|&n| self.tree.node(n).id == segment)
        else {
            return Ok(None);
        };
        if let Some(handle) = self.tree.node_mut(node).compression.take() {
            join_compression(handle).await?;
        }
        if self.tree.node(node).waveform.is_none() {
            let blob = self
                .store
                .get(&self.keys.wave(&segment.to_string()))
                .await?;
            self.tree.node_mut(node).waveform = blob;
        }
        Ok(self.tree.node(node).waveform.clone())
    }

    /// Les sources doivent produire des chunks entrelacés au format exact de
    /// la piste ; la conversion est le travail d'un graphe de filtre amont.
    fn check_source_spec(&self, spec: &StreamSpec) -> Result<(), TimelineError> {
        if !spec.compatible_with(&self.spec) || spec.format.is_planar() {
            return Err(TimelineError::FormatMismatch {
                expected: self.spec.to_string(),
                actual: spec.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn tree(&self) -> &TimelineTree {
        &self.tree
    }
}

async fn join_compression(
    handle: CompressionHandle,
) -> Result<(), TimelineError> {
    match handle.await {
        Ok(result) => result,
        Err(join) => Err(TimelineError::Codec(format!(
            "compression task aborted: {join}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pmocodec::{CodecError, DecodedAudio};
    use pmostore::MemoryStore;

    const RATE: u32 = 48_000;

    struct NullEngine {
        spec: StreamSpec,
    }

    #[async_trait]
    impl CodecEngine for NullEngine {
        async fn decode(&self, data: Bytes) -> Result<DecodedAudio, CodecError> {
            Ok(DecodedAudio {
                spec: self.spec,
                data,
            })
        }

        async fn encode(&self, request: EncodeRequest) -> Result<Bytes, CodecError> {
            Ok(request.data)
        }

        async fn filter_graph(
            &self,
            spec: &FilterSpec,
            input: StreamSpec,
            output: StreamSpec,
        ) -> Result<Box<dyn FilterHandle>, CodecError> {
            Ok(Box::new(pmocodec::PcmFilter::new(spec, input, output)?))
        }
    }

    fn mono_spec() -> StreamSpec {
        StreamSpec::new(SampleFormat::interleaved(SampleKind::I16), RATE, 1)
    }

    fn test_track() -> Track<NullEngine> {
        let spec = mono_spec();
        Track::new(
            spec,
            WorkerPool::new(2, move || NullEngine { spec }),
            Arc::new(MemoryStore::new()),
            TimelineConfig::default(),
        )
        .unwrap()
    }

    fn chunk_of(samples: Vec<i16>) -> PcmChunk {
        PcmChunk::from_i16_samples(samples, RATE, 1)
    }

    #[tokio::test]
    async fn test_close_is_clamped_and_compression_fires_once() {
        let mut track = test_track();
        let node = track.append_target().await.unwrap();
        track
            .write_into(node, 0, &chunk_of(vec![1, 2, 3, 4]))
            .unwrap();

        // Deuxième lecteur : le buffer chaud est partagé.
        track.open_segment(node).await.unwrap();
        assert_eq!(track.tree.node(node).readers, 2);

        track.close_segment(node, false);
        assert!(matches!(
            track.tree.node(node).payload,
            SegmentPayload::Hot(_)
        ));
        assert!(track.tree.node(node).compression.is_none());

        // Passage à zéro : buffer libéré, compression déclenchée.
        track.close_segment(node, false);
        assert!(matches!(track.tree.node(node).payload, SegmentPayload::Cold));
        assert!(track.tree.node(node).compression.is_some());

        // Fermetures excédentaires : jamais de compteur négatif, pas de
        // recompression au-delà du premier passage à zéro.
        track.close_segment(node, true);
        track.close_segment(node, true);
        assert_eq!(track.tree.node(node).readers, 0);
        track.flush().await.unwrap();
        assert!(track.tree.node(node).compression.is_none());
        track.close_segment(node, true);
        assert!(track.tree.node(node).compression.is_none());
    }

    #[tokio::test]
    async fn test_unmodified_close_releases_without_compression() {
        let mut track = test_track();
        track
            .append(pmopcm::MemoryStream::from_chunk(chunk_of(vec![5; 1_000])))
            .await
            .unwrap();
        track.flush().await.unwrap();

        let node = track.tree.in_order_ids()[0];
        track.open_segment(node).await.unwrap();
        track.close_segment(node, false);
        assert!(matches!(track.tree.node(node).payload, SegmentPayload::Cold));
        assert!(track.tree.node(node).compression.is_none());
    }

    #[tokio::test]
    async fn test_keep_open_reader_requires_explicit_close() {
        let mut track = test_track();
        track
            .append(pmopcm::MemoryStream::from_chunk(chunk_of(vec![7; 1_000])))
            .await
            .unwrap();

        {
            let mut reader = track.reader_with(0, None, true);
            let _ = reader.pull().await.unwrap().unwrap();
            // Sans cet appel, le compteur de lecteurs fuirait : il n'y a pas
            // de finaliseur automatique.
            reader.close_open_segments();
        }
        let node = track.tree.in_order_ids()[0];
        assert_eq!(track.tree.node(node).readers, 0);

        {
            let mut reader = track.reader_with(0, None, true);
            let _ = reader.pull().await.unwrap().unwrap();
        }
        // Consommateur annulé sans fermeture : la fuite est visible.
        assert_eq!(track.tree.node(node).readers, 1);
        track.close_segment(node, false);
    }
}
