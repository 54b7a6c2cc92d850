//! Fixture for rem-repair: `collect` is the parent function and `extracted`
//! is the function pulled out of its loop body.

fn main() {
    let mut buf = Vec::new();
    collect(&mut buf, 3);
    println!("{}", buf.len());
}

fn collect(buf: &mut Vec<i32>, n: i32) {
    for x in 0..n {
        extracted(buf, x);
    }
}

fn extracted(buf: &mut Vec<i32>, x: i32) {
    buf.push(x);
}
