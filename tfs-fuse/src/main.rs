mod block_file;
mod cli;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tfs::layout::header::{HEADER_SIZE, Header};
use tfs::{Config, FileId, Filesystem, IoBuf, ROOT_SIZE, lookup_kernel};
use typed_bytesize::ByteSizeIec;

use self::block_file::BlockFile;
use self::cli::{Cli, Command};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Format {
            size_mib,
            alignment,
        } => format(&cli.image, ByteSizeIec::mib(size_mib).0, alignment),
        Command::Locate => locate(&cli.image),
        command => {
            let fs = mount(&cli.image)?;
            run(&fs, command)?;
            wait(|done| fs.flush(done))?.map_err(fs_err)
        }
    }
}

fn fs_err(e: tfs::Error) -> io::Error {
    io::Error::other(e.to_string())
}

/// 镜像文件是同步设备，完成回调在提交时已经调用
fn wait<T: Send + 'static>(start: impl FnOnce(Box<dyn FnOnce(T) + Send>)) -> io::Result<T> {
    let slot = Arc::new(Mutex::new(None));
    let filler = slot.clone();
    start(Box::new(move |value| {
        if let Ok(mut slot) = filler.lock() {
            *slot = Some(value);
        }
    }));

    let value = slot
        .lock()
        .map_err(|_| io::Error::other("completion slot poisoned"))?
        .take();
    value.ok_or_else(|| io::Error::other("operation did not complete"))
}

fn format(image: &Path, size: u64, alignment: u64) -> io::Result<()> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)?;
    fd.set_len(size)?;

    let device = Arc::new(BlockFile::new(fd)?);
    let fs = wait(|done| Filesystem::create(device, Config::new(alignment, size), done))?
        .map_err(fs_err)?;
    println!(
        "image={image:?} size={size:#x} alignment={alignment} free={:#x}",
        fs.free_bytes()
    );
    Ok(())
}

/// 读取日志头中的几何参数后挂载
fn mount(image: &Path) -> io::Result<Arc<Filesystem>> {
    let mut fd = OpenOptions::new().read(true).write(true).open(image)?;
    let mut sector = [0; HEADER_SIZE];
    fd.seek(SeekFrom::Start(ROOT_SIZE))?;
    fd.read_exact(&mut sector)?;
    let header = Header::decode(&sector)
        .ok_or_else(|| io::Error::other(format!("{image:?} is not a tfs image")))?;
    log::info!("{image:?}: {header:?}");

    let device = Arc::new(BlockFile::new(fd)?);
    let config = Config::new(header.alignment, header.size);
    wait(|done| Filesystem::create(device, config, done))?.map_err(fs_err)
}

fn put(fs: &Arc<Filesystem>, path: &Path) -> io::Result<Arc<tfs::File>> {
    let data = fs::read(path)?;
    let file = fs.create_file().map_err(fs_err)?;
    wait(|done| file.write(IoBuf::from(data), 0, done))?.map_err(fs_err)?;
    log::info!("{path:?} -> file {} ({} bytes)", file.id(), file.len());
    Ok(file)
}

fn run(fs: &Arc<Filesystem>, command: Command) -> io::Result<()> {
    match command {
        Command::Put { path } => {
            let file = put(fs, &path)?;
            println!("{}", file.id());
        }
        Command::Get { id } => {
            let file = fs.lookup(FileId::from(id)).map_err(fs_err)?;
            let buf = wait(|done| file.read_entire(done))?.map_err(fs_err)?;
            let data = buf
                .to_vec()
                .map_err(|e| io::Error::other(format!("{e:?}")))?;
            io::stdout().write_all(&data)?;
        }
        Command::Kernel { path } => {
            let file = put(fs, &path)?;
            wait(|done| fs.publish_kernel(&file, done))?.map_err(fs_err)?;
            println!("{}", file.id());
        }
        Command::List => {
            for id in fs.files() {
                let file = fs.lookup(id).map_err(fs_err)?;
                println!("{id}\t{}", file.len());
            }
        }
        Command::Stat { id } => {
            let file = fs.lookup(FileId::from(id)).map_err(fs_err)?;
            let stat = file.stat().map_err(fs_err)?;
            println!(
                "size={} blocks={} block_size={} extents={}",
                stat.size, stat.blocks, stat.block_size, stat.extents
            );
            for extent in file.extents() {
                println!("  {:x?} -> {:#x}", extent.logical, extent.physical);
            }
        }
        Command::Rm { id } => {
            wait(|done| fs.delete(FileId::from(id), done))?.map_err(fs_err)?;
        }
        Command::Format { .. } | Command::Locate => unreachable!("handled before mounting"),
    }
    Ok(())
}

/// 不挂载，只读第一页
fn locate(image: &Path) -> io::Result<()> {
    let mut page = vec![0; ROOT_SIZE as usize];
    File::open(image)?.read_exact(&mut page)?;

    match lookup_kernel(&page) {
        Some(kernel) => {
            println!("offset={:#x} length={}", kernel.offset, kernel.length);
            Ok(())
        }
        None => Err(io::Error::other("no kernel registered in the root tuple")),
    }
}
