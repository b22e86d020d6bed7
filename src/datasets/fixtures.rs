//! Small random datasets in the on-disk layout, for tests.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    path::Path,
};

use hdf5::types::VarLenUnicode;
use ndarray::{arr0, Array, Array1, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub struct RandomDataset<'a> {
    pub sims: usize,
    pub frames: usize,
    pub scheme: &'a str,
    pub spatial: &'a [usize],
    pub constants: &'a [&'a str],
    pub seed: u64,
}

impl Default for RandomDataset<'_> {
    fn default() -> Self {
        Self {
            sims: 3,
            frames: 20,
            scheme: "aBBc",
            spatial: &[8, 6],
            constants: &["Const1"],
            seed: 1,
        }
    }
}

fn unicode(s: &str) -> VarLenUnicode {
    s.parse().expect("no interior nul")
}

impl RandomDataset<'_> {
    pub fn fields(&self) -> usize {
        self.scheme.chars().count()
    }

    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.frames, self.fields()];
        shape.extend_from_slice(self.spatial);
        shape
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> hdf5::Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let file = hdf5::File::create(path)?;
        let sims = file.create_group("sims")?;

        for i in 0..self.sims {
            let data = Array::from_shape_simple_fn(IxDyn(&self.shape()), || rng.gen::<f64>());
            let sim = sims
                .new_dataset_builder()
                .with_data(&data)
                .create(format!("sim{i}").as_str())?;
            for c in self.constants {
                sim.new_attr_builder()
                    .with_data(&arr0(rng.gen::<f64>()))
                    .create(*c)?;
            }
        }

        let fields: Array1<VarLenUnicode> = (0..self.fields())
            .map(|i| unicode(&format!("Field{i}")))
            .collect();
        let constants: Array1<VarLenUnicode> = self.constants.iter().map(|c| unicode(c)).collect();

        sims.new_attr_builder()
            .with_data(&arr0(unicode("The Everything Formula")))
            .create("PDE")?;
        sims.new_attr_builder()
            .with_data(&arr0(unicode(self.scheme)))
            .create("Fields Scheme")?;
        sims.new_attr_builder().with_data(&fields).create("Fields")?;
        if !self.constants.is_empty() {
            sims.new_attr_builder()
                .with_data(&constants)
                .create("Constants")?;
        }
        sims.new_attr_builder()
            .with_data(&arr0(0.01f64))
            .create("Dt")?;
        Ok(())
    }
}

/// A local HTTP server laid out like a Hugging Face dataset repository.
/// Unknown paths answer 404.
pub struct FakeHub {
    pub endpoint: String,
}

impl FakeHub {
    /// Serves `files` (repository path, contents) of `repo` and the matching
    /// repository listing.
    pub fn serve(repo: &str, files: Vec<(String, Vec<u8>)>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("http://{}", listener.local_addr()?);

        let siblings: Vec<serde_json::Value> = files
            .iter()
            .map(|(path, _)| serde_json::json!({ "rfilename": path }))
            .collect();
        let mut routes: HashMap<String, Vec<u8>> = files
            .into_iter()
            .map(|(path, body)| (format!("/datasets/{repo}/resolve/main/{path}"), body))
            .collect();
        routes.insert(
            format!("/api/datasets/{repo}"),
            serde_json::json!({ "id": repo, "siblings": siblings })
                .to_string()
                .into_bytes(),
        );

        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = respond(stream, &routes);
            }
        });
        Ok(Self { endpoint })
    }
}

fn respond(mut stream: TcpStream, routes: &HashMap<String, Vec<u8>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request = String::new();
    reader.read_line(&mut request)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
    }

    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = match routes.get(path) {
        Some(body) => ("200 OK", body.as_slice()),
        None => ("404 Not Found", &b"Entry not found"[..]),
    };
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}
